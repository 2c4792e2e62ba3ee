//! Write commands: `upsert`, `insert`, `patch` and `relate`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::*;

use super::fetch::handler::format_output;
use super::fetch::OutputFormat;
use super::{open_engine, read_payload};
use crate::cli::Cli;
use crate::config::Config;
use crate::engine::Upserted;

/// JSON payload source shared by the write commands
#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Inline JSON payload
    #[arg(long, short)]
    pub data: Option<String>,

    /// JSON file to read the payload from (`-` for stdin)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UpsertCommands {
    pub entity: String,

    /// Relation expression naming the relations to reconcile
    #[arg(long, short, default_value = "")]
    pub eager: String,

    /// Stored row the graph describes (defaults to the payload's primary key)
    #[arg(long)]
    pub id: Option<i64>,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct InsertCommands {
    pub entity: String,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct PatchCommands {
    pub entity: String,

    pub id: i64,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct RelateCommands {
    pub entity: String,

    /// Primary key of the parent row
    pub id: i64,

    /// Relation to attach the child under
    pub relation: String,

    #[command(flatten)]
    pub payload: PayloadArgs,
}

pub async fn handle_upsert_command(cli: &Cli, config: &Config, args: &UpsertCommands) -> Result<()> {
    let payload = read_payload(args.payload.data.clone(), args.payload.file.clone())?;
    let engine = open_engine(cli, config).await?;
    let upserted = engine
        .upsert_graph(&args.entity, args.id, &payload, &args.eager)
        .await
        .with_context(|| format!("Failed to upsert {} graph", args.entity))?;
    print_upserted("upserted", &upserted)
}

pub async fn handle_insert_command(cli: &Cli, config: &Config, args: &InsertCommands) -> Result<()> {
    let payload = read_payload(args.payload.data.clone(), args.payload.file.clone())?;
    let engine = open_engine(cli, config).await?;
    let upserted = engine
        .insert_graph(&args.entity, &payload)
        .await
        .with_context(|| format!("Failed to insert {} graph", args.entity))?;
    print_upserted("inserted", &upserted)
}

pub async fn handle_patch_command(cli: &Cli, config: &Config, args: &PatchCommands) -> Result<()> {
    let payload = read_payload(args.payload.data.clone(), args.payload.file.clone())?;
    let engine = open_engine(cli, config).await?;
    let upserted = engine
        .patch(&args.entity, args.id, &payload)
        .await
        .with_context(|| format!("Failed to patch {} {}", args.entity, args.id))?;
    print_upserted("patched", &upserted)
}

pub async fn handle_relate_command(cli: &Cli, config: &Config, args: &RelateCommands) -> Result<()> {
    let payload = read_payload(args.payload.data.clone(), args.payload.file.clone())?;
    let engine = open_engine(cli, config).await?;
    let upserted = engine
        .add_related(&args.entity, args.id, &args.relation, &payload)
        .await
        .with_context(|| {
            format!(
                "Failed to add {} to {} {}",
                args.relation, args.entity, args.id
            )
        })?;
    print_upserted("related", &upserted)
}

/// Status line on stderr, resulting graph on stdout
pub fn print_upserted(action: &str, upserted: &Upserted) -> Result<()> {
    let status = if upserted.report.is_empty() {
        "no changes".dimmed()
    } else {
        upserted.report.to_string().normal()
    };
    eprintln!("{} {}", action.bright_green().bold(), status);
    println!("{}", format_output(&upserted.graph, OutputFormat::Json)?);
    Ok(())
}
