//! Futures handed out by [`RpcEngine::request`](super::RpcEngine::request).

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::engine::EngineCore;
use crate::error::{Error, Result};

/// Removes an abandoned entry when its call is dropped unsettled.
struct AbandonGuard {
    core: Weak<EngineCore>,
    id: i64,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        if let Some(entry) = core.take(self.id) {
            entry.disarm();
            debug!(id = self.id, method = %entry.method, "request abandoned before settlement");
        }
    }
}

/// An in-flight request.
///
/// The request frame is already on the wire when this value is returned; the
/// future settles exactly once with the response, an [`Error::Rpc`], a
/// timeout, a cancellation, or a transport failure. Dropping it before it
/// settles forgets the request locally without notifying the peer.
#[must_use = "a PendingCall does nothing observable unless awaited"]
pub struct PendingCall<T> {
    id: i64,
    method: String,
    inner: BoxFuture<'static, Result<Value>>,
    abandon: AbandonGuard,
    _output: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl PendingCall<Value> {
    pub(super) fn new(
        id: i64,
        method: String,
        core: Weak<EngineCore>,
        settled: oneshot::Receiver<Result<Value>>,
    ) -> Self {
        let inner = async move {
            settled.await.unwrap_or_else(|_| {
                Err(Error::Transport(
                    "engine dropped before the request settled".to_string(),
                ))
            })
        }
        .boxed();

        Self {
            id,
            method,
            inner,
            abandon: AbandonGuard { core, id },
            _output: PhantomData,
        }
    }
}

impl<T> PendingCall<T> {
    /// Id allocated to this request.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Method name of this request.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Decode the result into `R` instead.
    pub fn typed<R: DeserializeOwned>(self) -> PendingCall<R> {
        PendingCall {
            id: self.id,
            method: self.method,
            inner: self.inner,
            abandon: self.abandon,
            _output: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Future for PendingCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner
            .poll_unpin(cx)
            .map(|outcome| outcome.and_then(|value| serde_json::from_value(value).map_err(Error::from)))
    }
}
