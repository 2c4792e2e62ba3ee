//! `relgraph init`

use anyhow::Result;
use colored::*;

use super::open_engine;
use crate::cli::Cli;
use crate::config::Config;

pub async fn handle_init_command(cli: &Cli, config: &Config, force: bool) -> Result<()> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);

    if path.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            path.display().to_string().yellow()
        );
    } else {
        config.save(&path)?;
        println!("Wrote config to {}", path.display().to_string().bright_green());
    }

    let engine = open_engine(cli, config).await?;
    let entities: Vec<&str> = engine
        .registry()
        .entities()
        .map(|entity| entity.table.as_str())
        .collect();
    println!(
        "Tables ready in {}: {}",
        config.database_url.cyan(),
        entities.join(", ")
    );
    Ok(())
}
