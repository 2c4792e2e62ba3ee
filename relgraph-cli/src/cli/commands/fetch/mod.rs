//! `relgraph fetch`

pub mod handler;

use std::path::PathBuf;

use clap::{Args, ValueEnum};

pub use handler::handle_fetch_command;

#[derive(Args, Debug)]
pub struct FetchCommands {
    /// Root entity name
    pub entity: String,

    /// Relation expression, e.g. `[parent, pets, movies.actors]`
    #[arg(long, short, default_value = "")]
    pub eager: String,

    /// Root filter condition (`column<op>value`), repeatable
    #[arg(long = "where", short = 'w')]
    pub conditions: Vec<String>,

    /// Fetch a single row by primary key
    #[arg(long, conflicts_with = "conditions")]
    pub id: Option<i64>,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Write results to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Print timing and row counts
    #[arg(long, value_enum, default_value_t = DisplayStyle::Plain)]
    pub style: DisplayStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisplayStyle {
    Plain,
    Verbose,
}
