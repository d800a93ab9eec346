//! Configuration for Relay
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. A TOML file: `relay.toml` in the working directory, or the path in
//!    `RELAY_CONFIG_PATH` (required when given explicitly)
//! 3. `RELAY_*` environment variables (`.env` files are honoured)
//!
//! # Example
//!
//! ```toml
//! properties = ["actions/greet.toml", "actions/orders.toml"]
//! log_filter = "relay_core=debug,info"
//! tick_millis = 1000
//! default_action = "MAIN"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TOML instruction-source files, loaded in order
    #[serde(default)]
    pub properties: Vec<PathBuf>,

    /// `tracing_subscriber::EnvFilter` directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Length of one idle/pause/total unit
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Action run by `relay run` when none is named
    #[serde(default)]
    pub default_action: Option<String>,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_tick_millis() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            log_filter: default_log_filter(),
            tick_millis: default_tick_millis(),
            default_action: None,
        }
    }
}

impl Config {
    /// Load with the default search.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

/// Explicit overrides applied on top of the file and environment.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    properties: Vec<PathBuf>,
    log_filter: Option<String>,
    tick_millis: Option<u64>,
}

impl ConfigBuilder {
    /// Config file path (overrides default search)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Extra property files, loaded after the configured ones
    pub fn properties(mut self, files: Vec<PathBuf>) -> Self {
        self.properties.extend(files);
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn tick_millis(mut self, millis: Option<u64>) -> Self {
        self.tick_millis = millis;
        self
    }

    pub fn build(self) -> Result<Config> {
        // a missing .env file is fine
        dotenvy::dotenv().ok();

        let (path, required) = match self.config_path {
            Some(path) => (path, true),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let mut config = load_sources(&path, required)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.properties.extend(self.properties);
        if let Some(filter) = self.log_filter {
            config.log_filter = filter;
        }
        if let Some(millis) = self.tick_millis {
            config.tick_millis = millis;
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_sources(path: &Path, required: bool) -> Result<Config> {
    let settings = config::Config::builder()
        .set_default("log_filter", default_log_filter())?
        .set_default("tick_millis", default_tick_millis() as i64)?
        .add_source(
            config::File::new(&path.to_string_lossy(), config::FileFormat::Toml).required(required),
        )
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("properties"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.tick_millis == 0 {
            anyhow::bail!("tick_millis must be greater than zero");
        }
        if let Some(action) = &self.default_action {
            if action.trim().is_empty() {
                anyhow::bail!("default_action must not be blank");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("relay-config-{}-{}.toml", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_file_values_and_overrides() {
        let path = write_config(
            "file",
            r#"
properties = ["a.toml"]
log_filter = "debug"
tick_millis = 250
default_action = "MAIN"
"#,
        );

        let config = Config::builder()
            .config_path(Some(path.clone()))
            .properties(vec![PathBuf::from("b.toml")])
            .tick_millis(Some(5))
            .build()
            .unwrap();

        assert_eq!(config.properties, vec![PathBuf::from("a.toml"), PathBuf::from("b.toml")]);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.tick(), Duration::from_millis(5));
        assert_eq!(config.default_action.as_deref(), Some("MAIN"));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let result = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/relay.toml")))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_tick_is_rejected() {
        let path = write_config("zero", "tick_millis = 0\n");

        let result = Config::builder().config_path(Some(path.clone())).build();

        assert!(result.is_err());
        fs::remove_file(path).ok();
    }
}
