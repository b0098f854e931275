//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain
//! services and their consumers, forwarding typed events to a
//! `tokio::sync::broadcast` channel that UI layers or companion processes
//! subscribe to.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{ConnectivityEvent, LinkEvent, OwnershipEvent, RecoveryEvent};

/// Bridges domain events to the broadcast channel.
///
/// For platform-specific emission (e.g. a desktop shell), the bridge also
/// forwards to an optional external emitter that can be set after
/// construction, which is useful when the platform handle is not available
/// until later in startup.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<LinkEvent>,
    /// Optional external emitter for platform-specific event delivery.
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter for platform-specific event delivery.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<LinkEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external
/// emitter (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(LinkEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_connectivity, ConnectivityEvent, Connectivity);
    impl_emit!(emit_ownership, OwnershipEvent, Ownership);
    impl_emit!(emit_recovery, RecoveryEvent, Recovery);
}
