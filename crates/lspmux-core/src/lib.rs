//! # lspmux-core
//!
//! JSON-RPC 2.0 engine and Language Server Protocol session client.
//!
//! The crate is layered:
//!
//! - [`transport`] - one physical connection (WebSocket, child process stdio
//!   or in-memory) with a connect/disconnect/keepalive state machine and
//!   message, open, close and error events
//! - [`rpc`] - JSON-RPC 2.0 request correlation, per-request timeouts,
//!   cancellation and notification dispatch
//! - [`session`] - LSP handshake, capability negotiation, text-sync shaping,
//!   document lifecycle and typed feature requests
//! - [`config`] - TOML configuration and loading
//! - [`error`] - error types for the library
//!
//! ## Example
//!
//! ```rust,ignore
//! use lspmux_core::{LspSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lspmux_core::Error> {
//!     let config = SessionConfig::load()?;
//!     let session = LspSession::start(&config).await?;
//!     println!("{:?}", session.sync_kind());
//!     session.shutdown().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod rpc;
pub mod session;
pub mod subscription;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Error, Result, RpcError};
pub use rpc::{CancellationToken, PendingCall, RequestOptions, RpcConfig, RpcEngine};
pub use session::{LspSession, ServerCapabilities, SessionState, SyncKind};
pub use subscription::Subscription;
pub use transport::{ConnectionState, MessageTransport, Transport, TransportEvents};
