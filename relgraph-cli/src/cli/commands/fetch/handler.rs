//! Fetch command handler

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;

use super::{DisplayStyle, FetchCommands, OutputFormat};
use crate::cli::commands::open_engine;
use crate::cli::Cli;
use crate::config::Config;
use crate::query::Filter;
use crate::relation::parse;

/// Handle the fetch command
pub async fn handle_fetch_command(cli: &Cli, config: &Config, args: &FetchCommands) -> Result<()> {
    let verbose = matches!(args.style, DisplayStyle::Verbose);

    // Parse before touching the database so typos fail fast
    let tree = parse(&args.eager).context("Failed to parse relation expression")?;
    if verbose {
        println!("Entity: {}", args.entity.bright_green().bold());
        println!("Relations: {}", tree.to_string().dimmed());
        println!();
    }

    let engine = open_engine(cli, config).await?;
    let start = Instant::now();

    let result = match args.id {
        Some(id) => engine
            .fetch_by_id(&args.entity, id, &args.eager)
            .await
            .context("Failed to fetch graph")?,
        None => {
            let filter = Filter::parse_all(args.conditions.iter().map(String::as_str))?;
            Value::Array(
                engine
                    .fetch_graph(&args.entity, &filter, &args.eager)
                    .await
                    .context("Failed to fetch graphs")?,
            )
        }
    };

    if verbose {
        let rows = result.as_array().map(|rows| rows.len()).unwrap_or(1);
        println!(
            "Fetched {} root rows in {:.2}ms",
            rows,
            start.elapsed().as_secs_f64() * 1000.0
        );
        println!();
    }

    let formatted_output = format_output(&result, args.format)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &formatted_output)
            .with_context(|| format!("Failed to write output to: {}", output_path.display()))?;
        if verbose {
            println!(
                "Results saved to: {}",
                output_path.display().to_string().bright_green()
            );
        }
    } else {
        println!("{}", formatted_output);
    }

    Ok(())
}

/// Format results according to the requested output format
pub fn format_output(data: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(data).context("Failed to format JSON output"),
        OutputFormat::JsonCompact => serde_json::to_string(data).context("Failed to format JSON output"),
    }
}
