//! Subscriber registry for state-change notifications.

use std::collections::HashMap;

use driftwire_core::ConnectionState;
use driftwire_proto::{DashboardStats, UserRecord};

/// Handle returned by [`SubscriberSet::subscribe`]; pass it back to
/// unsubscribe.
pub type SubscriberId = u64;

/// Point-in-time view handed to subscribers after each state change.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// All cached records, unfiltered and unsorted.
    pub users: Vec<UserRecord>,
    /// Aggregate counters at snapshot time.
    pub stats: DashboardStats,
    /// Connection state at snapshot time.
    pub connection: ConnectionState,
}

type Callback = Box<dyn FnMut(&StateSnapshot) + Send>;

/// Registered state-change callbacks.
///
/// Callbacks run synchronously, in registration order, after every merge
/// that changed the cache and after every connection state transition.
/// Unchanged merges (duplicate creates, dropped events) notify nobody.
#[derive(Default)]
pub struct SubscriberSet {
    /// Subscriber ID → callback, dispatched in ascending ID order.
    subscribers: HashMap<SubscriberId, Callback>,
    next_id: SubscriberId,
}

impl SubscriberSet {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Register a callback; returns the handle for later removal.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriberId
    where
        F: FnMut(&StateSnapshot) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, Box::new(callback));
        id
    }

    /// Remove a callback.
    ///
    /// Returns `true` if the handle was registered. Unknown handles are a
    /// no-op.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Invoke every callback with the snapshot, in registration order.
    pub fn notify(&mut self, snapshot: &StateSnapshot) {
        let mut ids: Vec<SubscriberId> = self.subscribers.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            if let Some(callback) = self.subscribers.get_mut(&id) {
                callback(snapshot);
            }
        }
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("subscribers", &self.subscribers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            users: Vec::new(),
            stats: DashboardStats::default(),
            connection: ConnectionState::Disconnected,
        }
    }

    #[test]
    fn notify_reaches_every_subscriber_in_order() {
        let mut set = SubscriberSet::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = Arc::clone(&order);
            set.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        set.notify(&snapshot());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut set = SubscriberSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = set.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        set.notify(&snapshot());
        assert!(set.unsubscribe(id));
        set.notify(&snapshot());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!set.unsubscribe(id));
    }
}
