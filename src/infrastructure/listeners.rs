//! Listener Registry
//!
//! Observer registry keyed by tagged tokens. Listeners are invoked in
//! registration order; a panicking listener is logged and skipped.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback stored in a registry.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Registry of listeners for events of type `E`.
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: RwLock<BTreeMap<ListenerId, Listener<E>>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a listener and return its token.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns false if the token was already removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke every listener with `event`. Returns how many returned normally.
    ///
    /// The listener set is snapshotted first, so listeners may register or
    /// remove listeners without deadlocking.
    pub fn notify(&self, event: &E) -> usize {
        let snapshot: Vec<(ListenerId, Listener<E>)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, l)| (*id, l.clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(listener = id.0, "listener panicked, skipping"),
            }
        }
        delivered
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned to callers; de-registers its listener on `unsubscribe`.
///
/// Holds only a weak reference, so outstanding handles never keep the owner
/// of the registry alive. Dropping the handle does not de-register.
pub struct ListenerHandle<E> {
    id: ListenerId,
    registry: Weak<ListenerRegistry<E>>,
}

impl<E> ListenerHandle<E> {
    pub fn new(id: ListenerId, registry: &Arc<ListenerRegistry<E>>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Safe to call more than once.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.remove(self.id))
            .unwrap_or(false)
    }
}
