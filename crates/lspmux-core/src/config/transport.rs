//! Transport selection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::{
    MessageTransport, StdioConnector, Transport, TransportOptions, WebSocketConnector,
};

/// Which connector a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn the server and speak over its stdin/stdout.
    #[default]
    Stdio,
    /// Connect to a server listening on a WebSocket URL.
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::WebSocket => f.write_str("websocket"),
        }
    }
}

/// `[transport]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Connector kind.
    #[serde(default)]
    pub kind: TransportKind,

    /// Server command for `stdio`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Server arguments for `stdio`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Server URL for `websocket`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Keepalive interval in seconds; `0` disables keepalive.
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,

    /// Extra environment for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            command: Some("rust-analyzer".to_string()),
            args: Vec::new(),
            url: None,
            keepalive_seconds: default_keepalive_seconds(),
            env: HashMap::new(),
        }
    }
}

const fn default_keepalive_seconds() -> u64 {
    30
}

impl TransportConfig {
    /// Keepalive interval, `None` when disabled.
    #[must_use]
    pub const fn keepalive_interval(&self) -> Option<Duration> {
        match self.keepalive_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Transport options derived from this table.
    #[must_use]
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            keepalive_interval: self.keepalive_interval(),
            ..TransportOptions::default()
        }
    }

    /// Check that the selected kind has what it needs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a missing command or URL.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TransportKind::Stdio => {
                if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                    return Err(Error::InvalidConfig(
                        "transport.command cannot be empty for stdio".to_string(),
                    ));
                }
            }
            TransportKind::WebSocket => {
                let url = self.url.as_deref().unwrap_or("");
                if url.trim().is_empty() {
                    return Err(Error::InvalidConfig(
                        "transport.url cannot be empty for websocket".to_string(),
                    ));
                }
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(Error::InvalidConfig(format!(
                        "transport.url must use ws:// or wss://, got '{url}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build a disconnected transport.
    ///
    /// `root` becomes the working directory of a spawned server.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not validate.
    pub fn build(&self, root: Option<&Path>) -> Result<Arc<dyn MessageTransport>> {
        self.validate()?;
        let options = self.options();

        match self.kind {
            TransportKind::Stdio => {
                let command = self.command.clone().unwrap_or_default();
                let mut connector =
                    StdioConnector::new(command, self.args.iter()).with_env(self.env.clone());
                if let Some(root) = root {
                    connector = connector.with_current_dir(root);
                }
                Ok(Arc::new(Transport::new(connector, options)))
            }
            TransportKind::WebSocket => {
                let url = self.url.clone().unwrap_or_default();
                Ok(Arc::new(Transport::new(WebSocketConnector::new(url), options)))
            }
        }
    }
}
