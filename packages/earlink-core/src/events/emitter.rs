//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative delivery paths
//! (IPC to a UI process, platform notification surfaces).

use super::{ConnectivityEvent, OwnershipEvent, RecoveryEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a primary-channel connectivity event.
    fn emit_connectivity(&self, event: ConnectivityEvent);

    /// Emits an audio-route ownership event.
    fn emit_ownership(&self, event: OwnershipEvent);

    /// Emits a transport-recovery lifecycle event.
    fn emit_recovery(&self, event: RecoveryEvent);
}

/// No-op emitter for tests and embedders that poll state instead.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_connectivity(&self, _event: ConnectivityEvent) {
        // No-op
    }

    fn emit_ownership(&self, _event: OwnershipEvent) {
        // No-op
    }

    fn emit_recovery(&self, _event: RecoveryEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_connectivity(&self, event: ConnectivityEvent) {
        log::debug!("[Events] connectivity: {:?}", event);
    }

    fn emit_ownership(&self, event: OwnershipEvent) {
        log::debug!("[Events] ownership: {:?}", event);
    }

    fn emit_recovery(&self, event: RecoveryEvent) {
        log::debug!("[Events] recovery: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events per category.
    struct CountingEventEmitter {
        connectivity: AtomicUsize,
        ownership: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_connectivity(&self, _event: ConnectivityEvent) {
            self.connectivity.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_ownership(&self, _event: OwnershipEvent) {
            self.ownership.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_recovery(&self, _event: RecoveryEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter {
            connectivity: AtomicUsize::new(0),
            ownership: AtomicUsize::new(0),
        });

        emitter.emit_ownership(OwnershipEvent::Changed {
            owned: true,
            timestamp: 0,
        });
        emitter.emit_ownership(OwnershipEvent::Lost { timestamp: 0 });

        assert_eq!(emitter.connectivity.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.ownership.load(Ordering::SeqCst), 2);
    }
}
