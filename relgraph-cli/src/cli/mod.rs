//! Command-line interface definitions

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::fetch::FetchCommands;
use commands::write::{InsertCommands, PatchCommands, RelateCommands, UpsertCommands};

#[derive(Parser, Debug)]
#[command(name = "relgraph", author, version, about = "Graph upserts and eager fetches over SQLite", long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL, overrides config and RELGRAPH_DATABASE_URL
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Schema TOML file, overrides config
    #[arg(long, global = true)]
    pub schema: Option<PathBuf>,

    /// Named filter usable in relation expressions, as `name:column<op>value`
    ///
    /// Repeat a name to combine conditions.
    #[arg(long = "modifier", short = 'm', global = true)]
    pub modifiers: Vec<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file and create the schema's tables
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Make the relations named by an expression match a graph
    Upsert(UpsertCommands),
    /// Insert a new graph with all its nested relations
    Insert(InsertCommands),
    /// Update attributes of a single row
    Patch(PatchCommands),
    /// Attach a new or existing row under a relation
    Relate(RelateCommands),
    /// Fetch rows with an eager relation expression
    Fetch(FetchCommands),
    /// Run the persons/pets/movies walkthrough against a fresh database
    Demo {
        /// Keep the demo database in this file instead of memory
        #[arg(long)]
        database_file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch_with_modifiers() {
        let cli = Cli::try_parse_from([
            "relgraph",
            "-m",
            "adults:age>=18",
            "fetch",
            "person",
            "--eager",
            "children(adults)",
            "--where",
            "age>=41",
        ])
        .unwrap();

        assert_eq!(cli.modifiers, vec!["adults:age>=18"]);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.entity, "person");
                assert_eq!(args.eager, "children(adults)");
                assert_eq!(args.conditions, vec!["age>=41"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
