use std::sync::Arc;
use std::time::Duration;

use lspmux_core::rpc::{RequestOptions, RpcConfig, RpcEngine};
use lspmux_core::transport::{
    CloseReason, MessageTransport, StdioConnector, Transport, TransportEvents,
};
use lspmux_core::ConnectionState;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::common::test_utils::{memory_transport, quiet_options};

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_no_reconnect_after_remote_close() {
    let (transport, peer) = memory_transport();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let on_close = transport.on_close(move |reason| {
        let _ = closed_tx.send(reason);
    });

    transport.connect().await.unwrap();
    assert_eq!(peer.connections(), 1);

    peer.close();
    assert_eq!(closed_rx.recv().await, Some(CloseReason::Remote));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(transport.send("{}".to_string()).is_err());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(peer.connections(), 1);

    transport.connect().await.unwrap();
    assert_eq!(peer.connections(), 2);
    transport.send("{\"hello\":1}".to_string()).unwrap();
    assert_eq!(peer.recv().await.as_deref(), Some("{\"hello\":1}"));

    on_close.unsubscribe();
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_engine_survives_reconnect() {
    let (transport, peer) = memory_transport();
    let engine = RpcEngine::new(Arc::clone(&transport) as Arc<dyn MessageTransport>, RpcConfig::default());
    transport.connect().await.unwrap();

    let first = engine.request("test/first", Value::Null, RequestOptions::default());
    assert_eq!(first.id(), 1);
    drop(first);

    transport.disconnect().await;
    transport.connect().await.unwrap();

    let second = engine.request("test/second", Value::Null, RequestOptions::default());
    assert_eq!(second.id(), 2);

    // The first link's frame is gone with it; the new link carries the second.
    let frame = peer.recv_json().await.unwrap();
    assert_eq!(frame["id"], 2);
    peer.send_json(&json!({"jsonrpc": "2.0", "id": 2, "result": "ok"}));
    assert_eq!(second.await.unwrap(), json!("ok"));
}

/// `cat` echoes every framed message back, so the engine hears its own
/// notifications and sees its own requests arrive as server requests.
#[cfg(unix)]
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_stdio_framing_through_cat() {
    let transport: Arc<dyn MessageTransport> = Arc::new(Transport::new(
        StdioConnector::new("cat", Vec::<String>::new()),
        quiet_options(),
    ));
    let engine = RpcEngine::new(Arc::clone(&transport), RpcConfig::default());
    transport.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let echo = engine.on_notification("custom/echo", move |params| {
        let _ = tx.send(params.clone());
    });

    engine
        .notify("custom/echo", json!({"text": "héllo wörld", "n": 2}))
        .unwrap();
    let params = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params, json!({"text": "héllo wörld", "n": 2}));

    let call = engine.request(
        "custom/neverAnswered",
        Value::Null,
        RequestOptions::default().timeout(Duration::from_millis(200)),
    );
    assert!(call.await.unwrap_err().is_timeout());

    echo.unsubscribe();
    transport.disconnect().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn test_spawn_failure_reports_error() {
    let transport = Transport::new(
        StdioConnector::new("/nonexistent/lsp-server-binary", ["--stdio"]),
        quiet_options(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_error = transport.on_error(move |message| {
        let _ = tx.send(message.to_string());
    });

    let err = transport.connect().await.unwrap_err();
    assert!(err.to_string().contains("lsp-server-binary"));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(rx.recv().await.is_some());

    on_error.unsubscribe();
}
