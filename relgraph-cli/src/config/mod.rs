//! Runtime configuration for the `relgraph` binary
//!
//! Loaded from `config.toml` in the platform config directory (or an explicit
//! path), then overridden by the environment. `.env` files are honoured.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`Config::database_url`]
pub const DATABASE_URL_ENV: &str = "RELGRAPH_DATABASE_URL";
/// Environment variable overriding [`Config::schema_path`]
pub const SCHEMA_PATH_ENV: &str = "RELGRAPH_SCHEMA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sqlx SQLite URL, e.g. `sqlite://relgraph.db`
    pub database_url: String,
    /// TOML schema document; the bundled demo schema when unset
    pub schema_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://relgraph.db".to_string(),
            schema_path: None,
            log_level: LogLevel::Warn,
            max_connections: 5,
        }
    }
}

impl Config {
    /// `~/.config/relgraph/config.toml` (or the platform equivalent)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relgraph")
            .join("config.toml")
    }

    /// Load the config file and apply environment overrides
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file given explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Absence of .env is fine
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    log::debug!("No config at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database_url = url;
        }
        if let Ok(schema) = std::env::var(SCHEMA_PATH_ENV) {
            config.schema_path = Some(PathBuf::from(schema));
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str("max_connections = 2\nlog_level = \"debug\"").unwrap();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.database_url, Config::default().database_url);
        assert_eq!(config.schema_path, None);
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(Config::from_toml_str("log_level = \"loud\"").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            database_url: "sqlite://test.db".to_string(),
            schema_path: Some(PathBuf::from("schema.toml")),
            log_level: LogLevel::Info,
            max_connections: 3,
        };

        config.save(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
