//! Initialization for Relay
//!
//! Loads configuration, installs logging and the instruction source, and
//! hands back a ready [`Engine`].
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_core::init::InitBuilder;
//!
//! # fn main() -> anyhow::Result<()> {
//! let app = InitBuilder::new()
//!     .properties_file("actions/greet.toml")
//!     .init()?;
//! let ok = app.engine.execute_sequence("GREET", Default::default());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::interpreter::{Engine, Properties};

/// Set once the global subscriber is in place
static LOGGING: OnceLock<()> = OnceLock::new();

/// Options for initializing Relay
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Property files loaded after the configured ones
    pub properties: Vec<PathBuf>,

    /// Log filter (overrides config file and RELAY_LOG_FILTER; RUST_LOG still wins)
    pub log_filter: Option<String>,

    /// Timing unit in milliseconds (overrides config file and env vars)
    pub tick_millis: Option<u64>,

    /// Skip installing the tracing subscriber
    pub skip_logging: bool,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Add a property file
    pub fn properties_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.properties.push(path.into());
        self
    }

    pub fn properties_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.options.properties.extend(paths);
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn tick_millis(mut self, millis: u64) -> Self {
        self.options.tick_millis = Some(millis);
        self
    }

    pub fn skip_logging(mut self, skip: bool) -> Self {
        self.options.skip_logging = skip;
        self
    }

    /// Initialize Relay with the configured options
    pub fn init(self) -> Result<Application> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured engine together with the configuration it came from.
#[derive(Clone)]
pub struct Application {
    pub config: Config,
    pub engine: Engine,
}

/// Initialize Relay with the given options
///
/// - Loads and validates configuration
/// - Installs the tracing subscriber (first call only)
/// - Loads every property file into one store
/// - Builds the engine with the built-in commands and providers
pub fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .config_path(options.config_path)
        .properties(options.properties)
        .log_filter(options.log_filter)
        .tick_millis(options.tick_millis)
        .build()
        .context("Failed to load configuration")?;

    if !options.skip_logging {
        init_logging(&config.log_filter);
    }

    let properties = Properties::new();
    for file in &config.properties {
        let loaded = properties
            .load_file(file)
            .with_context(|| format!("Failed to load properties from {}", file.display()))?;
        info!(file = %file.display(), entries = loaded, "Loaded properties");
    }

    let engine = Engine::builder()
        .properties(Arc::new(properties))
        .tick(config.tick())
        .build();

    Ok(Application { config, engine })
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `filter`.
pub fn init_logging(filter: &str) {
    LOGGING.get_or_init(|| {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let env_filter = select_filter(rust_log.as_deref(), filter);
        // another subscriber may already be installed by the host
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init();
    });
}

pub fn is_logging_initialized() -> bool {
    LOGGING.get().is_some()
}

/// Valid `RUST_LOG` directives first, then the configured filter.
fn select_filter(rust_log: Option<&str>, configured: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(configured))
}
