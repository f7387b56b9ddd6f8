//! WebSocket transport: one JSON-RPC message per text frame.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::{Connector, FrameSink, FrameStream};
use crate::error::{Error, Result};

/// Connects to a language server exposed over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for a `ws://` or `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        if self.url.starts_with("wss://") {
            install_crypto_provider();
        }

        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("failed to connect to {}: {e}", self.url)))?;

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| Error::Transport(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, Error>(WsMessage::text(frame))));

        let stream = read.filter_map(|item| future::ready(inbound_frame(item)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Make ring the process-wide rustls provider unless one is already set.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Map a WebSocket message to a text frame; control frames are skipped.
fn inbound_frame(
    item: std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String>> {
    match item {
        Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(text)),
            Err(e) => {
                warn!(error = %e, "dropping non UTF-8 binary frame");
                None
            }
        },
        Ok(WsMessage::Close(frame)) => {
            debug!(?frame, "close frame received");
            None
        }
        Ok(_) => None,
        Err(e) => Some(Err(Error::Transport(e.to_string()))),
    }
}
