use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use relgraph::cli::commands::{self, demo, fetch, init, write};
use relgraph::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;

    let level = match cli.verbose {
        0 => config.log_level.filter(),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG still wins when set
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    log::debug!("Using database {}", config.database_url);

    match &cli.command {
        Commands::Init { force } => init::handle_init_command(&cli, &config, *force).await,
        Commands::Upsert(args) => write::handle_upsert_command(&cli, &config, args).await,
        Commands::Insert(args) => write::handle_insert_command(&cli, &config, args).await,
        Commands::Patch(args) => write::handle_patch_command(&cli, &config, args).await,
        Commands::Relate(args) => write::handle_relate_command(&cli, &config, args).await,
        Commands::Fetch(args) => fetch::handle_fetch_command(&cli, &config, args).await,
        Commands::Demo { database_file } => demo::handle_demo_command(database_file.as_deref()).await,
    }
}
