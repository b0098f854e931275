//! Per-handle fan-out of inbound frames to registered listeners.
//!
//! The router is the hand-off point between channel read loops and
//! consumers: attribute notifications are dispatched by their handle, and
//! raw control-channel frames by the reserved [`CONTROL_STREAM_HANDLE`]
//! (an external codec turns those into domain events).
//!
//! Listeners are typed observers with an explicit subscription id returned
//! at registration; removal is by id, never by callback identity. Within a
//! handle, dispatch order is insertion order. A panicking listener is
//! caught and logged without aborting dispatch to the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// Reserved handle carrying raw primary-channel frames.
pub const CONTROL_STREAM_HANDLE: u16 = 0x0000;

/// Opaque id returned at registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Listener callback. Receives the frame payload for its handle.
pub type ListenerFn = dyn Fn(&[u8]) + Send + Sync;

struct Entry {
    id: SubscriptionId,
    callback: Arc<ListenerFn>,
}

/// Registry and dispatcher for frame listeners.
pub struct NotificationRouter {
    /// handle -> listeners in insertion order.
    listeners: DashMap<u16, Vec<Entry>>,
}

impl NotificationRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    /// Registers a listener for a handle. Returns the id used to remove it.
    pub fn subscribe<F>(&self, handle: u16, callback: F) -> SubscriptionId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.listeners.entry(handle).or_default().push(Entry {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes a listener by subscription id.
    ///
    /// Returns `true` if a listener was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        for mut entry in self.listeners.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|e| e.id != id);
            if entry.value().len() != before {
                return true;
            }
        }
        false
    }

    /// Dispatches a payload to every listener registered for `handle`.
    ///
    /// Callbacks run outside the registry lock, so a listener may subscribe
    /// or unsubscribe reentrantly. Listener panics are isolated.
    pub fn dispatch(&self, handle: u16, payload: &[u8]) {
        let callbacks: Vec<Arc<ListenerFn>> = match self.listeners.get(&handle) {
            Some(entry) => entry.iter().map(|e| Arc::clone(&e.callback)).collect(),
            None => return,
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                log::error!(
                    "[Router] Listener for handle {:#06X} panicked; continuing dispatch",
                    handle
                );
            }
        }
    }

    /// Returns the number of listeners registered for a handle.
    #[must_use]
    pub fn listener_count(&self, handle: u16) -> usize {
        self.listeners.get(&handle).map_or(0, |e| e.len())
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn dispatch_preserves_insertion_order() {
        let router = NotificationRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            router.subscribe(0x2001, move |_| order.lock().push(tag));
        }

        router.dispatch(0x2001, &[0]);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_removes_by_id_only() {
        let router = NotificationRouter::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h1 = hits.clone();
        let id1 = router.subscribe(0x2001, move |_| h1.lock().push(1));
        let h2 = hits.clone();
        let _id2 = router.subscribe(0x2001, move |_| h2.lock().push(2));

        assert!(router.unsubscribe(id1));
        assert!(!router.unsubscribe(id1));
        router.dispatch(0x2001, &[0]);

        assert_eq!(*hits.lock(), vec![2]);
        assert_eq!(router.listener_count(0x2001), 1);
    }

    #[test]
    fn panicking_listener_does_not_abort_dispatch() {
        let router = NotificationRouter::new();
        let hits = Arc::new(Mutex::new(0usize));

        router.subscribe(0x2001, |_| panic!("listener bug"));
        let h = hits.clone();
        router.subscribe(0x2001, move |_| *h.lock() += 1);

        router.dispatch(0x2001, &[0]);
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn dispatch_to_unknown_handle_is_a_noop() {
        let router = NotificationRouter::new();
        router.dispatch(0x7777, &[1, 2, 3]);
    }

    #[test]
    fn listener_payload_matches_dispatched_bytes() {
        let router = NotificationRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        router.subscribe(CONTROL_STREAM_HANDLE, move |payload| {
            s.lock().push(payload.to_vec());
        });

        router.dispatch(CONTROL_STREAM_HANDLE, &[0xDE, 0xAD]);
        assert_eq!(*seen.lock(), vec![vec![0xDE, 0xAD]]);
    }
}
