//! JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result, RpcError};

/// JSON-RPC protocol version written on every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Request identifier as it may appear on the wire.
///
/// The engine only ever allocates numeric ids; string ids can still arrive
/// from the peer and never match a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version, always "2.0".
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request with a numeric id.
    #[must_use]
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: RequestId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification message (no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version, always "2.0".
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version, always "2.0".
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request identifier; `null` when the peer could not read the request id.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Result value (if successful).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object (if failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Split into the settlement outcome: the error object if present,
    /// otherwise the result (`null` when absent).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] when the response carries an error object.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::Rpc(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any single JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request(JsonRpcRequest),
    /// A one-way message.
    Notification(JsonRpcNotification),
    /// A reply to an earlier request.
    Response(JsonRpcResponse),
}

impl Message {
    /// Classify and decode one message object.
    ///
    /// An object with `method` is a request when it also carries `id`,
    /// otherwise a notification. An object with `id` and no `method` is a
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the value does not fit the grammar.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::Protocol(format!(
                "expected a message object, got {}",
                type_name(&value)
            )));
        };

        let has_method = object.contains_key("method");
        let has_id = object.contains_key("id");

        match (has_method, has_id) {
            (true, true) => decode(object, "request").map(Self::Request),
            (true, false) => decode(object, "notification").map(Self::Notification),
            (false, true) => decode(object, "response").map(Self::Response),
            (false, false) => Err(Error::Protocol(
                "message carries neither 'method' nor 'id'".to_string(),
            )),
        }
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(object: Map<String, Value>, kind: &str) -> Result<T> {
    serde_json::from_value(Value::Object(object))
        .map_err(|e| Error::Protocol(format!("invalid {kind}: {e}")))
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decoded inbound frame: one message value or a batch of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single message value.
    Single(Value),
    /// A batch; each element is dispatched on its own.
    Batch(Vec<Value>),
}

impl Payload {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not valid JSON.
    pub fn parse(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| Error::Protocol(format!("invalid JSON frame: {e}")))?;
        Ok(match value {
            Value::Array(items) => Self::Batch(items),
            other => Self::Single(other),
        })
    }

    /// The message values in wire order.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Single(value) => vec![value],
            Self::Batch(items) => items,
        }
    }
}

/// Normalize serialized params: `null` means "no params" and is omitted.
pub(crate) fn encode_params<P: Serialize>(params: P) -> Result<Option<Value>> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
