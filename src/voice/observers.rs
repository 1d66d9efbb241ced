//! Listener registry with deterministic unsubscribe.
//!
//! Callbacks run synchronously on the emitting thread. Emission snapshots the
//! registered callbacks first, so a callback may subscribe or unsubscribe
//! without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

/// A set of callbacks for one event type
pub struct Listeners<T> {
    inner: Arc<Registry<T>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push((id, Arc::new(callback)));
        }

        let registry = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Ok(mut entries) = registry.entries.lock() {
                        entries.retain(|(entry_id, _)| *entry_id != id);
                    }
                }
            })),
        }
    }

    /// Invoke every registered callback with `event`
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = match self.inner.entries.lock() {
            Ok(entries) => entries.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(_) => return,
        };

        for callback in snapshot {
            callback(event);
        }
    }

    /// Drop every callback
    pub fn clear(&self) {
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe`
/// to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener. Idempotent across clones of the registry.
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
