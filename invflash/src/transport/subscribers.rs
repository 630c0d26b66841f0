//! Ordered fan-out of received frames.
//!
//! Subscribers are kept in registration order, keyed by a monotonically
//! increasing id. Dispatch works on a snapshot of the registry, so a callback
//! may unsubscribe itself or others without deadlocking; removals take effect
//! from the next frame.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::trace;

type Callback = Arc<Mutex<dyn FnMut(&[u8]) + Send>>;

/// Identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: BTreeMap<SubscriptionId, Callback>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking subscriber must not take the transport down with it
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of frame subscribers.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every frame dispatched from now on.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .callbacks
            .insert(id, Arc::new(Mutex::new(callback)));
        trace!("Subscriber {id:?} registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `frame` to every subscriber, in registration order.
    pub fn dispatch(&self, frame: &[u8]) {
        let snapshot: Vec<Callback> = lock(&self.inner)
            .callbacks
            .values()
            .cloned()
            .collect();

        for callback in snapshot {
            let mut callback = lock(&callback);
            (*callback)(frame);
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// Handle returned by [`Subscribers::subscribe`].
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Identifier of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback. Harmless if the registry is already gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).callbacks.remove(&self.id);
            trace!("Subscriber {:?} removed", self.id);
        }
    }
}
