//! Message-oriented transports.
//!
//! A transport owns one physical connection and moves opaque text frames, one
//! JSON-RPC message (or batch) per frame. It never parses frame content.
//!
//! [`Transport`] implements the connection state machine
//! (`Disconnected -> Connecting -> Open -> Disconnected`) on top of any
//! [`Connector`], which only has to produce a frame sink and a frame stream:
//!
//! - [`WebSocketConnector`] - one message per WebSocket text frame
//! - [`StdioConnector`] - a spawned language server speaking `Content-Length`
//!   framed messages on stdin/stdout
//! - [`MemoryConnector`] - an in-process channel pair, driven by a [`MemoryPeer`]

mod memory;
mod stdio;
mod websocket;

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub use memory::{MemoryConnector, MemoryPeer, memory_pair};
pub use stdio::StdioConnector;
pub use websocket::WebSocketConnector;

use crate::error::{Error, Result};
use crate::subscription::{Registry, Subscription, invoke_guarded, lock};

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Frame written on every keepalive tick.
///
/// An argument-less notification for a method servers are expected to ignore.
pub const KEEPALIVE_FRAME: &str = r#"{"jsonrpc":"2.0","method":"$/keepalive"}"#;

/// Outbound half of an established link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of an established link. The stream ending means the remote
/// side closed the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Callback invoked for transport events.
pub type EventHandler = dyn Fn(&TransportEvent) + Send + Sync;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection; `send` fails.
    Disconnected,
    /// A connection attempt is in progress; `send` fails.
    Connecting,
    /// Frames can be sent and received.
    Open,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        };
        f.write_str(name)
    }
}

/// Why a connection entered `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// [`MessageTransport::disconnect`] was called.
    Local,
    /// The remote side closed the connection.
    Remote,
    /// Reading or writing failed.
    Error,
}

/// Event kinds that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    /// Connection entered `Open`.
    Open,
    /// A frame arrived.
    Message,
    /// Connection entered `Disconnected`.
    Close,
    /// The connection failed.
    Error,
}

/// Event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection entered `Open`.
    Open,
    /// A text frame arrived.
    Message(String),
    /// Connection entered `Disconnected`.
    Close(CloseReason),
    /// The connection failed; a `Close` event follows.
    Error(String),
}

impl TransportEvent {
    /// The kind used to route this event to subscribers.
    #[must_use]
    pub const fn kind(&self) -> TransportEventKind {
        match self {
            Self::Open => TransportEventKind::Open,
            Self::Message(_) => TransportEventKind::Message,
            Self::Close(_) => TransportEventKind::Close,
            Self::Error(_) => TransportEventKind::Error,
        }
    }
}

/// Capability set the RPC engine consumes.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Establish the connection. A no-op while `Connecting` or `Open`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector fails to establish a link.
    async fn connect(&self) -> Result<()>;

    /// Close the connection. A no-op while `Disconnected`.
    async fn disconnect(&self);

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the connection is not `Open`.
    fn send(&self, frame: String) -> Result<()>;

    /// Register a handler for one event kind.
    fn subscribe(&self, kind: TransportEventKind, handler: Arc<EventHandler>) -> Subscription;
}

/// Typed subscription helpers for any [`MessageTransport`].
pub trait TransportEvents: MessageTransport {
    /// Subscribe to inbound frames.
    fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(
            TransportEventKind::Message,
            Arc::new(move |event| {
                if let TransportEvent::Message(frame) = event {
                    handler(frame);
                }
            }),
        )
    }

    /// Subscribe to the connection opening.
    fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(TransportEventKind::Open, Arc::new(move |_| handler()))
    }

    /// Subscribe to the connection closing.
    fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        self.subscribe(
            TransportEventKind::Close,
            Arc::new(move |event| {
                if let TransportEvent::Close(reason) = event {
                    handler(*reason);
                }
            }),
        )
    }

    /// Subscribe to connection failures.
    fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(
            TransportEventKind::Error,
            Arc::new(move |event| {
                if let TransportEvent::Error(message) = event {
                    handler(message);
                }
            }),
        )
    }
}

impl<T: MessageTransport + ?Sized> TransportEvents for T {}

/// Produces fresh links for a [`Transport`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new link.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be established.
    async fn connect(&self) -> Result<(FrameSink, FrameStream)>;

    /// Human readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Interval between keepalive frames; `None` disables keepalive.
    pub keepalive_interval: Option<Duration>,
    /// Frame written on every keepalive tick.
    pub keepalive_frame: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_frame: KEEPALIVE_FRAME.to_string(),
        }
    }
}

struct Link {
    state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    link: Mutex<Link>,
    events: Registry<TransportEventKind, EventHandler>,
}

impl Shared {
    fn emit(&self, event: &TransportEvent) {
        for handler in self.events.snapshot(&event.kind()) {
            invoke_guarded("transport event", || handler(event));
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let link = lock(&self.link);
        link.generation == generation && link.state != ConnectionState::Disconnected
    }

    /// Move to `Disconnected` and notify subscribers.
    ///
    /// With `Some(generation)` only that connection is closed, so a stale
    /// task can never tear down a newer one.
    fn shut(&self, generation: Option<u64>, reason: CloseReason) -> bool {
        let tasks = {
            let mut link = lock(&self.link);
            if generation.is_some_and(|g| g != link.generation)
                || link.state == ConnectionState::Disconnected
            {
                return false;
            }
            link.state = ConnectionState::Disconnected;
            link.outbound = None;
            std::mem::take(&mut link.tasks)
        };

        for task in tasks {
            task.abort();
        }
        debug!(?reason, "transport disconnected");
        self.emit(&TransportEvent::Close(reason));
        true
    }

    fn fail(&self, generation: u64, message: String) {
        if !self.is_current(generation) {
            return;
        }
        warn!(error = %message, "transport failure");
        self.emit(&TransportEvent::Error(message));
        self.shut(Some(generation), CloseReason::Error);
    }
}

/// Connection state machine over a [`Connector`].
pub struct Transport<C> {
    connector: C,
    options: TransportOptions,
    shared: Arc<Shared>,
}

impl<C> std::fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &lock(&self.shared.link).state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Transport<C> {
    /// Create a disconnected transport.
    #[must_use]
    pub fn new(connector: C, options: TransportOptions) -> Self {
        Self {
            connector,
            options,
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    tasks: Vec::new(),
                }),
                events: Registry::new(),
            }),
        }
    }

    /// Create a disconnected transport with default options.
    #[must_use]
    pub fn with_defaults(connector: C) -> Self {
        Self::new(connector, TransportOptions::default())
    }

    /// Transport options.
    #[must_use]
    pub const fn options(&self) -> &TransportOptions {
        &self.options
    }
}

#[async_trait]
impl<C: Connector> MessageTransport for Transport<C> {
    async fn connect(&self) -> Result<()> {
        let generation = {
            let mut link = lock(&self.shared.link);
            if link.state != ConnectionState::Disconnected {
                debug!(state = %link.state, "connect ignored");
                return Ok(());
            }
            link.state = ConnectionState::Connecting;
            link.generation += 1;
            link.generation
        };

        debug!(endpoint = %self.connector.describe(), "connecting");

        let (sink, stream) = match self.connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                let aborted = {
                    let mut link = lock(&self.shared.link);
                    if link.generation == generation && link.state == ConnectionState::Connecting {
                        link.state = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                };
                if aborted {
                    self.shared.emit(&TransportEvent::Error(e.to_string()));
                }
                return Err(e);
            }
        };

        {
            let mut link = lock(&self.shared.link);
            if link.generation != generation || link.state != ConnectionState::Connecting {
                return Err(Error::Transport(
                    "connection attempt aborted by disconnect".to_string(),
                ));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            link.state = ConnectionState::Open;

            // The writer is not tracked: it exits once every sender is gone
            // and closes the sink on the way out.
            tokio::spawn(write_loop(Arc::clone(&self.shared), generation, sink, rx));
            link.tasks.push(tokio::spawn(read_loop(
                Arc::clone(&self.shared),
                generation,
                stream,
            )));
            if let Some(every) = self.options.keepalive_interval {
                link.tasks.push(tokio::spawn(keepalive_loop(
                    tx.clone(),
                    every,
                    self.options.keepalive_frame.clone(),
                )));
            }
            link.outbound = Some(tx);
        }

        debug!(endpoint = %self.connector.describe(), "transport open");
        self.shared.emit(&TransportEvent::Open);
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.shut(None, CloseReason::Local);
    }

    fn state(&self) -> ConnectionState {
        lock(&self.shared.link).state
    }

    fn send(&self, frame: String) -> Result<()> {
        let link = lock(&self.shared.link);
        match (&link.state, &link.outbound) {
            (ConnectionState::Open, Some(outbound)) => outbound
                .send(frame)
                .map_err(|_| Error::Transport("connection writer has stopped".to_string())),
            (state, _) => Err(Error::Transport(format!("cannot send while {state}"))),
        }
    }

    fn subscribe(&self, kind: TransportEventKind, handler: Arc<EventHandler>) -> Subscription {
        self.shared.events.subscribe(kind, handler)
    }
}

impl<C> Drop for Transport<C> {
    fn drop(&mut self) {
        self.shared.shut(None, CloseReason::Local);
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = outbound.recv().await {
        trace!(frame = %frame, "sending frame");
        if let Err(e) = sink.send(frame).await {
            shared.fail(generation, e.to_string());
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "closing sink failed");
    }
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut stream: FrameStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => {
                trace!(frame = %frame, "received frame");
                shared.emit(&TransportEvent::Message(frame));
            }
            Err(e) => {
                shared.fail(generation, e.to_string());
                return;
            }
        }
    }
    shared.shut(Some(generation), CloseReason::Remote);
}

async fn keepalive_loop(outbound: mpsc::UnboundedSender<String>, every: Duration, frame: String) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        ticker.tick().await;
        if outbound.send(frame.clone()).is_err() {
            break;
        }
        trace!("keepalive sent");
    }
}
