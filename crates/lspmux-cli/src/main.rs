//! lspmux - command-line language server client
//!
//! Loads a session configuration, connects to a language server, runs the
//! LSP handshake and prints results as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use lspmux_core::SessionConfig;

mod args;
mod commands;
mod logging;

use args::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(&args.log_level, args.log_json)?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting lspmux");

    let mut config = if let Some(config_path) = &args.config {
        SessionConfig::load_from(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        SessionConfig::load().context("failed to load configuration")?
    };

    if config.client.root.is_none() {
        config.client.root = Some(std::env::current_dir().context("no working directory")?);
    }

    match args.command {
        Command::Config => commands::show_config(&config),
        Command::Capabilities => commands::capabilities(&config).await,
        Command::Symbols { file } => commands::symbols(&config, &file).await,
    }
}
