//! JSON-RPC 2.0 engine.
//!
//! Framing, request/response correlation, per-request timeouts, cancellation
//! and notification dispatch on top of a [`MessageTransport`](crate::transport::MessageTransport).
//! Knows nothing about LSP methods.

mod call;
mod engine;
pub mod message;

pub use call::PendingCall;
pub use engine::{
    CANCEL_METHOD, DEFAULT_REQUEST_TIMEOUT, NotificationHandler, RequestOptions, RpcConfig,
    RpcEngine,
};
pub use message::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
pub use tokio_util::sync::CancellationToken;
