//! In-process transport for tests and embedders.
//!
//! [`memory_pair`] returns a connector for the client side and a
//! [`MemoryPeer`] that plays the server: it sees every frame the client sends
//! and can push frames, fail the link, or close it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::Notify;

use super::{Connector, FrameSink, FrameStream};
use crate::error::{Error, Result};
use crate::subscription::lock;

struct PeerShared {
    to_client: Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
    from_client: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    connected: Notify,
    connections: AtomicUsize,
    refuse: AtomicBool,
}

/// Create a connected connector/peer pair.
#[must_use]
pub fn memory_pair() -> (MemoryConnector, MemoryPeer) {
    let shared = Arc::new(PeerShared {
        to_client: Mutex::new(None),
        from_client: tokio::sync::Mutex::new(None),
        connected: Notify::new(),
        connections: AtomicUsize::new(0),
        refuse: AtomicBool::new(false),
    });
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryPeer { shared },
    )
}

/// Client-side connector of an in-memory link.
pub struct MemoryConnector {
    shared: Arc<PeerShared>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused by peer".to_string()));
        }

        let (client_tx, peer_rx) = mpsc::unbounded::<String>();
        let (peer_tx, client_rx) = mpsc::unbounded::<Result<String>>();

        *self.shared.from_client.lock().await = Some(peer_rx);
        *lock(&self.shared.to_client) = Some(peer_tx);
        self.shared.connections.fetch_add(1, Ordering::SeqCst);
        self.shared.connected.notify_one();

        let sink = client_tx.sink_map_err(|e| Error::Transport(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Server side of an in-memory link.
pub struct MemoryPeer {
    shared: Arc<PeerShared>,
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

impl MemoryPeer {
    /// Next frame sent by the client.
    ///
    /// Waits for a connection if none exists yet. Returns `None` once the
    /// client closed its side of the current link.
    pub async fn recv(&self) -> Option<String> {
        loop {
            {
                let mut guard = self.shared.from_client.lock().await;
                if let Some(rx) = guard.as_mut() {
                    return rx.next().await;
                }
            }
            self.shared.connected.notified().await;
        }
    }

    /// Next frame sent by the client, parsed as JSON.
    ///
    /// Frames that are not valid JSON are returned as JSON strings.
    pub async fn recv_json(&self) -> Option<Value> {
        let frame = self.recv().await?;
        Some(serde_json::from_str(&frame).unwrap_or(Value::String(frame)))
    }

    /// Push a frame to the client. Returns `false` if no link is open.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        lock(&self.shared.to_client)
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(Ok(frame.into())).is_ok())
    }

    /// Push a JSON value to the client as one frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Make the client's read side fail.
    pub fn fail(&self, message: &str) -> bool {
        lock(&self.shared.to_client).as_ref().is_some_and(|tx| {
            tx.unbounded_send(Err(Error::Transport(message.to_string())))
                .is_ok()
        })
    }

    /// Close the current link from the peer side.
    pub fn close(&self) {
        lock(&self.shared.to_client).take();
    }

    /// Refuse (or accept again) future connection attempts.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of links established so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}
