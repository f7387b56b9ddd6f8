//! Request correlation, timeouts, cancellation and notification dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::call::PendingCall;
use super::message::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, Payload, RequestId,
    encode_params,
};
use crate::error::{Error, Result};
use crate::subscription::{Registry, Subscription, invoke_guarded, lock};
use crate::transport::{MessageTransport, TransportEvents};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Notification sent when a pending request is cancelled locally.
pub const CANCEL_METHOD: &str = "$/cancelRequest";

/// Callback invoked with a notification's params (`null` when absent).
pub type NotificationHandler = dyn Fn(&Value) + Send + Sync;

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    /// Deadline applied to requests that do not set their own.
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Token that cancels the request when triggered before settlement.
    pub cancellation: Option<CancellationToken>,
    /// Deadline override.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options carrying a cancellation token.
    #[must_use]
    pub fn cancellable(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            timeout: None,
        }
    }

    /// Options carrying an optional cancellation token.
    #[must_use]
    pub const fn with_cancellation(token: Option<CancellationToken>) -> Self {
        Self {
            cancellation: token,
            timeout: None,
        }
    }

    /// Override the deadline for this request.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One unsettled request.
pub(super) struct PendingRequest {
    pub(super) method: String,
    settle: oneshot::Sender<Result<Value>>,
    watchdog: Option<JoinHandle<()>>,
}

impl PendingRequest {
    /// Stop the timeout/cancellation watchdog.
    pub(super) fn disarm(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.abort();
        }
    }

    fn settle(self, outcome: Result<Value>) {
        self.disarm();
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.settle.send(outcome);
    }
}

struct PendingTable {
    next_id: i64,
    pending: HashMap<i64, PendingRequest>,
}

pub(super) struct EngineCore {
    transport: Arc<dyn MessageTransport>,
    table: Mutex<PendingTable>,
    notifications: Registry<String, NotificationHandler>,
    config: RpcConfig,
}

impl EngineCore {
    /// Remove an entry. Whoever removes it settles it; removing twice is a
    /// no-op.
    pub(super) fn take(&self, id: i64) -> Option<PendingRequest> {
        lock(&self.table).pending.remove(&id)
    }

    fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        trace!(method, "sending notification");
        self.transport.send(frame)
    }

    fn expire(&self, id: i64, timeout: Duration) {
        let Some(entry) = self.take(id) else {
            return;
        };
        debug!(id, method = %entry.method, "request timed out");
        let method = entry.method.clone();
        entry.settle(Err(Error::Timeout {
            method,
            elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }));
    }

    fn cancel(&self, id: i64) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        debug!(id, method = %entry.method, "cancelling request");
        if let Err(e) = self.send_notification(CANCEL_METHOD, Some(json!({ "id": id }))) {
            debug!(id, error = %e, "cancel notification not delivered");
        }
        let method = entry.method.clone();
        entry.settle(Err(Error::Cancelled { method }));
        true
    }

    fn handle_frame(&self, frame: &str) {
        let payload = match Payload::parse(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        for value in payload.into_values() {
            match Message::from_value(value) {
                Ok(Message::Response(response)) => self.resolve(response),
                Ok(Message::Notification(notification)) => {
                    self.deliver(&notification.method, notification.params.unwrap_or(Value::Null));
                }
                Ok(Message::Request(request)) => {
                    debug!(
                        id = %request.id,
                        method = %request.method,
                        "ignoring server-initiated request"
                    );
                }
                Err(e) => warn!(error = %e, "dropping malformed message"),
            }
        }
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let Some(RequestId::Number(id)) = response.id else {
            debug!(id = ?response.id, "ignoring response without a numeric id");
            return;
        };
        let Some(entry) = self.take(id) else {
            debug!(id, "ignoring response with no pending request");
            return;
        };
        trace!(id, method = %entry.method, "response matched");
        entry.settle(response.into_result());
    }

    fn deliver(&self, method: &str, params: Value) {
        let handlers = self.notifications.snapshot(&method.to_string());
        if handlers.is_empty() {
            trace!(method, "no subscribers for notification");
            return;
        }
        for handler in handlers {
            invoke_guarded(method, || handler(&params));
        }
    }

    fn abort_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = lock(&self.table);
            table.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            entry.settle(Err(Error::Transport(reason.to_string())));
        }
        count
    }
}

/// Races one request's deadline against its cancellation token.
async fn watchdog(
    core: Weak<EngineCore>,
    id: i64,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
) {
    let cancelled = async {
        match &cancellation {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = tokio::time::sleep(timeout) => {
            if let Some(core) = core.upgrade() {
                core.expire(id, timeout);
            }
        }
        () = cancelled => {
            if let Some(core) = core.upgrade() {
                core.cancel(id);
            }
        }
    }
}

/// JSON-RPC 2.0 engine over one [`MessageTransport`].
///
/// Owns the id counter and the pending table of one session. Ids start at 1,
/// strictly increase and are never reused. Responses may settle in any
/// order; each is matched only by its id.
pub struct RpcEngine {
    core: Arc<EngineCore>,
    inbound: Option<Subscription>,
}

impl std::fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEngine")
            .field("config", &self.core.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl RpcEngine {
    /// Create an engine and attach it to the transport's message events.
    #[must_use]
    pub fn new(transport: Arc<dyn MessageTransport>, config: RpcConfig) -> Self {
        let core = Arc::new(EngineCore {
            transport,
            table: Mutex::new(PendingTable {
                next_id: 1,
                pending: HashMap::new(),
            }),
            notifications: Registry::new(),
            config,
        });

        let weak = Arc::downgrade(&core);
        let inbound = core.transport.on_message(move |frame| {
            if let Some(core) = weak.upgrade() {
                core.handle_frame(frame);
            }
        });

        Self {
            core,
            inbound: Some(inbound),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> RpcConfig {
        self.core.config
    }

    /// Transport this engine writes to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.core.transport
    }

    /// Issue a request.
    ///
    /// The id is allocated and the frame written before this returns. The
    /// returned future settles exactly once; serialization and send failures
    /// settle it immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request<P: Serialize>(
        &self,
        method: &str,
        params: P,
        options: RequestOptions,
    ) -> PendingCall<Value> {
        let (settle, settled) = oneshot::channel();
        let id = {
            let mut table = lock(&self.core.table);
            let id = table.next_id;
            table.next_id += 1;
            table.pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    settle,
                    watchdog: None,
                },
            );
            id
        };
        let call = PendingCall::new(id, method.to_string(), Arc::downgrade(&self.core), settled);

        if options
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            if let Some(entry) = self.core.take(id) {
                entry.settle(Err(Error::Cancelled {
                    method: method.to_string(),
                }));
            }
            return call;
        }

        let frame = encode_params(params).and_then(|params| {
            serde_json::to_string(&JsonRpcRequest::new(id, method, params)).map_err(Error::from)
        });
        let sent = frame.and_then(|frame| {
            trace!(id, method, "sending request");
            self.core.transport.send(frame)
        });
        if let Err(e) = sent {
            if let Some(entry) = self.core.take(id) {
                entry.settle(Err(e));
            }
            return call;
        }

        let timeout = options.timeout.unwrap_or(self.core.config.request_timeout);
        let handle = tokio::spawn(watchdog(
            Arc::downgrade(&self.core),
            id,
            timeout,
            options.cancellation,
        ));

        let mut table = lock(&self.core.table);
        match table.pending.get_mut(&id) {
            Some(entry) => entry.watchdog = Some(handle),
            None => handle.abort(),
        }
        drop(table);

        call
    }

    /// Issue a request and decode its result as `R`.
    pub fn request_as<R: DeserializeOwned, P: Serialize>(
        &self,
        method: &str,
        params: P,
        options: RequestOptions,
    ) -> PendingCall<R> {
        self.request(method, params, options).typed()
    }

    /// Send a notification. Never touches the pending table.
    ///
    /// # Errors
    ///
    /// Returns an error if params fail to serialize or the transport is not open.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        self.core.send_notification(method, encode_params(params)?)
    }

    /// Subscribe to a notification method. Subscribers run in registration
    /// order; a panicking subscriber is logged and skipped.
    pub fn on_notification<F>(&self, method: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.core
            .notifications
            .subscribe(method.to_string(), Arc::new(handler))
    }

    /// Number of subscribers registered for a notification method.
    #[must_use]
    pub fn subscriber_count(&self, method: &str) -> usize {
        self.core.notifications.count(&method.to_string())
    }

    /// Number of unsettled requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.core.table).pending.len()
    }

    /// Reject every unsettled request with [`Error::Transport`].
    ///
    /// The engine never does this on its own; in-flight requests otherwise
    /// run into their timeout when the connection drops.
    pub fn abort_pending(&self, reason: &str) -> usize {
        let count = self.core.abort_all(reason);
        if count > 0 {
            debug!(count, reason, "aborted pending requests");
        }
        count
    }

    /// Reject every unsettled request as soon as the transport closes.
    pub fn abort_pending_on_close(&self) -> Subscription {
        let weak = Arc::downgrade(&self.core);
        self.core.transport.on_close(move |reason| {
            if let Some(core) = weak.upgrade() {
                let count = core.abort_all(&format!("connection closed ({reason:?})"));
                debug!(count, ?reason, "pending requests rejected on close");
            }
        })
    }
}

impl Drop for RpcEngine {
    fn drop(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            inbound.unsubscribe();
        }
    }
}
