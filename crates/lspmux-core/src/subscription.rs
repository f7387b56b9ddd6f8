//! Ordered handler registries with unsubscribe handles.
//!
//! Both the transport event hub and the engine's notification dispatch sit on
//! [`Registry`]: a map from a key to the handlers registered under it, kept in
//! registration order. Every registration returns a [`Subscription`] that
//! removes exactly that handler.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a subscriber callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_guarded<F: FnOnce()>(label: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic>".to_string());
            error!(subscriber = label, %reason, "subscriber panicked");
            false
        }
    }
}

/// Handle returned by every registration.
///
/// Call [`Subscription::unsubscribe`] to remove the handler. Dropping the
/// handle keeps the handler registered for the lifetime of its registry.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. Safe to call after the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

struct Slots<K, H: ?Sized> {
    next_token: u64,
    handlers: HashMap<K, Vec<(u64, Arc<H>)>>,
}

/// Key to ordered-handlers map.
pub(crate) struct Registry<K, H: ?Sized> {
    slots: Arc<Mutex<Slots<K, H>>>,
}

impl<K, H> Registry<K, H>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_token: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Register `handler` under `key`, after every handler already there.
    pub(crate) fn subscribe(&self, key: K, handler: Arc<H>) -> Subscription {
        let token = {
            let mut slots = lock(&self.slots);
            slots.next_token += 1;
            let token = slots.next_token;
            slots
                .handlers
                .entry(key.clone())
                .or_default()
                .push((token, handler));
            token
        };

        let weak = Arc::downgrade(&self.slots);
        Subscription {
            remove: Some(Box::new(move || {
                let Some(slots) = weak.upgrade() else {
                    return;
                };
                let mut slots = lock(&slots);
                if let Some(list) = slots.handlers.get_mut(&key) {
                    list.retain(|(t, _)| *t != token);
                    if list.is_empty() {
                        slots.handlers.remove(&key);
                    }
                }
            })),
        }
    }

    /// Handlers currently registered under `key`, in registration order.
    ///
    /// The snapshot is taken under the lock and returned so callers can run
    /// the handlers without holding it.
    pub(crate) fn snapshot(&self, key: &K) -> Vec<Arc<H>> {
        lock(&self.slots)
            .handlers
            .get(key)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Number of handlers registered under `key`.
    pub(crate) fn count(&self, key: &K) -> usize {
        lock(&self.slots).handlers.get(key).map_or(0, Vec::len)
    }
}
