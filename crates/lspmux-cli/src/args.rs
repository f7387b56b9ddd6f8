//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Language server client
///
/// Connects to a language server over stdio or WebSocket, runs the LSP
/// handshake and prints query results as JSON.
#[derive(Debug, Parser)]
#[command(name = "lspmux")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, searches for lspmux.toml in:
    /// 1. $LSPMUX_CONFIG environment variable
    /// 2. Current directory
    /// 3. ~/.config/lspmux/lspmux.toml
    #[arg(short, long, value_name = "FILE", env = "LSPMUX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level
    ///
    /// Valid values: trace, debug, info, warn, error
    #[arg(short, long, default_value = "warn", env = "LSPMUX_LOG", global = true)]
    pub log_level: String,

    /// Output logs as JSON (for structured logging)
    #[arg(long, default_value = "false", env = "LSPMUX_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Print the effective configuration as TOML
    Config,

    /// Run the handshake and print the negotiated capabilities
    Capabilities,

    /// Open a file and print its document symbols
    Symbols {
        /// File to inspect
        file: PathBuf,
    },
}
