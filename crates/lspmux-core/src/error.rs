//! Error types for lspmux-core.
//!
//! Every request-level failure reaches the original caller as one of the
//! variants below. Protocol-level problems on inbound frames are logged by the
//! engine and never surface here unless a caller parses a payload itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error object returned by the peer.
///
/// Code, message and data are preserved exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.code, self.message)
    }
}

/// Standard JSON-RPC and LSP error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A request was received before `initialize`.
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;
    /// The request was cancelled by the client.
    pub const REQUEST_CANCELLED: i64 = -32800;
    /// The document changed while the request was running.
    pub const CONTENT_MODIFIED: i64 = -32801;
}

/// The main error type for lspmux-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Send attempted while the transport is not open, or the link failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived within the per-request deadline.
    #[error("request '{method}' timed out after {elapsed_ms} ms")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// Deadline that elapsed, in milliseconds.
        elapsed_ms: u64,
    },

    /// Malformed inbound payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error object.
    #[error("server error: {0}")]
    Rpc(RpcError),

    /// The request was cancelled locally before it settled.
    #[error("request '{method}' was cancelled")]
    Cancelled {
        /// Method of the cancelled request.
        method: String,
    },

    /// The language server failed to complete the `initialize` handshake.
    #[error("LSP initialization failed: {message}")]
    LspInitFailed {
        /// Description of the initialization failure.
        message: String,
    },

    /// Language server process failed to spawn.
    #[error("failed to spawn language server '{command}': {source}")]
    ServerSpawnFailed {
        /// Command that failed to spawn.
        command: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid URI format.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Check if this error is a local timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a local cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The peer's error object, if the server rejected the request.
    #[must_use]
    pub const fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

/// A specialized Result type for lspmux-core operations.
pub type Result<T> = std::result::Result<T, Error>;
