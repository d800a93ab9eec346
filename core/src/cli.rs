use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;
use std::sync::Arc;

use crate::init::{Application, InitBuilder};
use crate::interpreter::{RequestContext, ACTION_RESULT};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay - run action sequences from property files", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Property file holding actions (repeatable)
    #[arg(long = "properties", global = true)]
    pub properties: Vec<PathBuf>,

    /// Length of one timing unit in milliseconds
    #[arg(long, global = true)]
    pub tick_millis: Option<u64>,

    /// Log filter (overrides the config file; RUST_LOG still wins)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an action as the top-level sequence of a new request
    Run {
        /// Action name (defaults to `default_action` from the config)
        action: Option<String>,

        /// Request parameter as key=value; values that parse as JSON are kept typed
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, JsonValue)>,
    },

    /// Decode every instruction and report unknown commands or bad decorations
    Check,

    /// List the actions defined in the loaded properties
    Actions,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let mut builder = InitBuilder::new().properties_files(cli.properties);
    if let Some(path) = cli.config {
        builder = builder.config_path(path);
    }
    if let Some(millis) = cli.tick_millis {
        builder = builder.tick_millis(millis);
    }
    if let Some(filter) = cli.log {
        builder = builder.log_filter(filter);
    }
    let app = builder.init()?;

    match cli.command {
        Commands::Run { action, params } => run_action(app, action, params).await,
        Commands::Check => check(&app),
        Commands::Actions => {
            let names = app.engine.properties().action_names();
            if names.is_empty() {
                println!("No actions defined.");
            }
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn run_action(app: Application, action: Option<String>, params: Vec<(String, JsonValue)>) -> Result<()> {
    let action = action
        .or(app.config.default_action.clone())
        .ok_or_else(|| anyhow!("No action given and no default_action configured"))?;

    let params: Map<String, JsonValue> = params.into_iter().collect();
    let request = Arc::new(RequestContext::new(params));
    let engine = app.engine.clone();

    let ok = {
        let request = Arc::clone(&request);
        let action = action.clone();
        tokio::task::spawn_blocking(move || engine.execute_in(request, &action))
            .await
            .context("Action runner panicked")?
    };

    if let Some(result) = request.global(ACTION_RESULT) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    if let Some(error) = request.error() {
        eprintln!("Error: {}", error);
    }
    if !ok {
        bail!("Action {} failed (request {})", action, request.id());
    }
    Ok(())
}

fn check(app: &Application) -> Result<()> {
    let issues = app.engine.check();
    if issues.is_empty() {
        println!("{} action(s) checked, no issues.", app.engine.properties().action_names().len());
        return Ok(());
    }
    for issue in &issues {
        println!("{}", issue);
    }
    bail!("{} issue(s) found", issues.len())
}

fn parse_param(text: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", text))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", text));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}
