//! Event system for collaborators outside the core.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for fan-out to external consumers
//! - Event types for connectivity, ownership and transport recovery
//!
//! Raw inbound protocol frames are NOT events; they flow through the
//! [`NotificationRouter`](crate::router::NotificationRouter) to an external
//! codec. Events carry only the lifecycle facts the core owns.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::transport::RemoteAddr;

/// Events broadcast to external consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum LinkEvent {
    /// Primary-channel connectivity changes.
    Connectivity(ConnectivityEvent),

    /// Audio-route ownership changes.
    Ownership(OwnershipEvent),

    /// Transport-recovery marker lifecycle.
    Recovery(RecoveryEvent),
}

/// Why a session ended, as reported on disconnect events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    /// A local `disconnect()` requested the teardown.
    Local,
    /// The remote closed the channel (end-of-stream).
    RemoteClosed,
    /// The read loop hit an I/O error.
    ReadError,
}

/// Connectivity events for the primary session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectivityEvent {
    /// A session reached the Connected state.
    Connected {
        /// Accessory address.
        remote: RemoteAddr,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The session ended.
    Disconnected {
        /// Accessory address.
        remote: RemoteAddr,
        /// Why the session ended.
        reason: DisconnectReason,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Ownership events derived from the echoed claim-ownership value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OwnershipEvent {
    /// The accessory-tracked ownership flag changed.
    Changed {
        /// Whether this controller now owns the audio route.
        owned: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Ownership moved away without a local request.
    Lost {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Transport-recovery marker lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecoveryEvent {
    /// A marker was armed after a remote-initiated drop with media active.
    Armed {
        /// Accessory address the marker is tagged with.
        remote: RemoteAddr,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A reconnect inside the TTL consumed the marker; a playback resume
    /// will be requested once routing confirms.
    Consumed {
        /// Accessory address.
        remote: RemoteAddr,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The marker expired without a reconnect.
    Expired {
        /// Accessory address.
        remote: RemoteAddr,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl From<ConnectivityEvent> for LinkEvent {
    fn from(event: ConnectivityEvent) -> Self {
        LinkEvent::Connectivity(event)
    }
}

impl From<OwnershipEvent> for LinkEvent {
    fn from(event: OwnershipEvent) -> Self {
        LinkEvent::Ownership(event)
    }
}

impl From<RecoveryEvent> for LinkEvent {
    fn from(event: RecoveryEvent) -> Self {
        LinkEvent::Recovery(event)
    }
}
