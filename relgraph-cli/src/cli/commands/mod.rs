//! Command handlers

pub mod demo;
pub mod fetch;
pub mod init;
pub mod write;

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::Config;
use crate::engine::GraphEngine;
use crate::query::{Filter, Modifiers};
use crate::schema::{self, SchemaRegistry, DEMO_SCHEMA};
use crate::storage::SqliteBackend;

use super::Cli;

/// Config with command-line overrides applied
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database_url = database.clone();
    }
    if let Some(schema) = &cli.schema {
        config.schema_path = Some(schema.clone());
    }
    Ok(config)
}

/// Load the configured schema (or the bundled demo schema) and install it process-wide
pub fn load_registry(config: &Config) -> Result<Arc<SchemaRegistry>> {
    if let Some(registry) = schema::global() {
        return Ok(registry);
    }

    let registry = match &config.schema_path {
        Some(path) => SchemaRegistry::from_file(path)
            .with_context(|| format!("Failed to load schema: {}", path.display()))?,
        None => {
            log::debug!("No schema configured, using the demo schema");
            SchemaRegistry::from_toml_str(DEMO_SCHEMA)?
        }
    };
    Ok(schema::install(registry)?)
}

/// Parse `name:condition` modifier specs, combining repeated names
pub fn parse_modifiers(specs: &[String]) -> Result<Modifiers> {
    let mut grouped: Vec<(String, Filter)> = Vec::new();
    for spec in specs {
        let (name, condition) = spec
            .split_once(':')
            .with_context(|| format!("Modifier '{}' must look like name:column<op>value", spec))?;
        let name = name.trim();
        let condition = Filter::parse_condition(condition)?;

        match grouped.iter_mut().find(|(existing, _)| existing.as_str() == name) {
            Some((_, filter)) => filter.conditions.push(condition),
            None => grouped.push((
                name.to_string(),
                Filter {
                    conditions: vec![condition],
                },
            )),
        }
    }

    Ok(grouped
        .into_iter()
        .fold(Modifiers::new(), |modifiers, (name, filter)| modifiers.register(name, filter)))
}

/// Connect to the configured database and build an engine over it
pub async fn open_engine(cli: &Cli, config: &Config) -> Result<GraphEngine<SqliteBackend>> {
    let registry = load_registry(config)?;
    let backend = SqliteBackend::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("Failed to open database: {}", config.database_url))?;
    backend.ensure_tables(&registry).await?;

    Ok(GraphEngine::new(backend, registry).with_modifiers(parse_modifiers(&cli.modifiers)?))
}

/// Read a JSON payload from `--data`, `--file`, or stdin when the file is `-`
pub fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<Value> {
    let text = match (data, file) {
        (Some(_), Some(_)) => anyhow::bail!("Cannot specify both --data and --file"),
        (None, None) => anyhow::bail!("Either provide --data or use --file to specify a JSON file"),
        (Some(data), None) => data,
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read JSON from stdin")?;
            buffer
        }
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read JSON file: {}", path.display()))?,
    };

    serde_json::from_str(&text).context("Payload is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_modifiers_groups_by_name() {
        let modifiers = parse_modifiers(&[
            "adults:age>=18".to_string(),
            "dogs:species=dog".to_string(),
            "adults:age<=99".to_string(),
        ])
        .unwrap();

        assert_eq!(modifiers.get("adults").unwrap().conditions.len(), 2);
        assert_eq!(modifiers.get("dogs").unwrap().conditions[0].value, json!("dog"));
    }

    #[test]
    fn test_parse_modifiers_requires_name() {
        assert!(parse_modifiers(&["age>=18".to_string()]).is_err());
    }

    #[test]
    fn test_read_payload_sources() {
        let value = read_payload(Some("{\"age\": 71}".to_string()), None).unwrap();
        assert_eq!(value, json!({"age": 71}));

        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "[1, 2]").unwrap();
        let value = read_payload(None, Some(file.path().to_path_buf())).unwrap();
        assert_eq!(value, json!([1, 2]));

        assert!(read_payload(None, None).is_err());
        assert!(read_payload(Some("{".to_string()), None).is_err());
    }
}
