use serde_json::{Value, json};

use lspmux_core::transport::MemoryPeer;

/// Server side of an in-memory link, driven step by step by a test.
///
/// Every `expect_*` call consumes the next frame the client sent and
/// panics if it is not what the test expected.
pub struct ScriptedServer {
    peer: MemoryPeer,
}

#[allow(dead_code, clippy::unwrap_used, clippy::expect_used)]
impl ScriptedServer {
    pub const fn new(peer: MemoryPeer) -> Self {
        Self { peer }
    }

    pub const fn peer(&self) -> &MemoryPeer {
        &self.peer
    }

    /// Next frame sent by the client.
    pub async fn next_message(&self) -> Value {
        self.peer
            .recv_json()
            .await
            .expect("client closed the link")
    }

    /// Next frame, which must be a request for `method`. Returns it whole.
    pub async fn expect_request(&self, method: &str) -> Value {
        let message = self.next_message().await;
        assert_eq!(message["method"], method, "unexpected frame: {message}");
        assert!(message["id"].is_i64(), "request without id: {message}");
        message
    }

    /// Next frame, which must be a notification for `method`. Returns its params.
    pub async fn expect_notification(&self, method: &str) -> Value {
        let message = self.next_message().await;
        assert_eq!(message["method"], method, "unexpected frame: {message}");
        assert!(message.get("id").is_none(), "notification with id: {message}");
        message.get("params").cloned().unwrap_or(Value::Null)
    }

    /// Answer request `id` with `result`.
    pub fn respond(&self, id: &Value, result: Value) {
        assert!(
            self.peer
                .send_json(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
        );
    }

    /// Answer request `id` with an error object.
    pub fn respond_error(&self, id: &Value, code: i64, message: &str) {
        assert!(self.peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })));
    }

    /// Push a notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        assert!(
            self.peer
                .send_json(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
        );
    }

    /// Push a raw frame to the client.
    pub fn send_raw(&self, frame: &str) {
        assert!(self.peer.send(frame));
    }

    /// Answer the next request for `method` with `result`.
    pub async fn answer(&self, method: &str, result: Value) -> Value {
        let request = self.expect_request(method).await;
        self.respond(&request["id"], result);
        request
    }

    /// Answer `initialize` with the given capabilities.
    pub async fn accept_initialize(&self, capabilities: Value) -> Value {
        self.answer(
            "initialize",
            json!({
                "capabilities": capabilities,
                "serverInfo": {"name": "scripted-server", "version": "0.1.0"}
            }),
        )
        .await
    }
}
