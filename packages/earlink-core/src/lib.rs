//! Earlink Core - session and ownership layer for a paired wireless
//! audio accessory.
//!
//! This crate manages the two protocol channels to the accessory
//! (primary control channel plus a minimal attribute-style channel),
//! decides when to (re)connect under flaky radio conditions, and decides
//! when this device should claim exclusive ownership of the audio route
//! among several paired controllers.
//!
//! # Architecture
//!
//! - [`transport`]: channel abstractions and the platform factory seam
//! - [`session`]: session lifecycle, reconnect policy, transport recovery
//! - [`attribute`]: client for the secondary attribute channel
//! - [`arbiter`]: audio-route ownership arbitration
//! - [`router`]: inbound frame fan-out to registered listeners
//! - [`events`]: domain events and the broadcast bridge
//! - [`runtime`]: task spawning abstraction
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Platform-specific behavior enters through a small set of traits:
//!
//! - [`SecureChannelFactory`](transport::SecureChannelFactory): how
//!   channels to the accessory are actually obtained
//! - [`AudioRouting`](arbiter::AudioRouting): local playback and routing
//!   control
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//!
//! The standalone daemon provides development implementations; a real
//! deployment supplies platform adapters.

#![warn(clippy::all)]

pub mod arbiter;
pub mod attribute;
pub mod bootstrap;
pub mod control;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod router;
pub mod runtime;
pub mod session;
pub mod state;
pub mod transport;
pub mod utils;

// Re-export commonly used types at the crate root
pub use arbiter::{
    AccessoryState, AudioRouting, AudioSource, AudioSourceKind, ControlLink, OwnershipArbiter,
    OwnershipState, TakeoverTrigger,
};
pub use attribute::AttributeClient;
pub use bootstrap::{bootstrap, BootstrappedServices};
pub use control::ControlCommand;
pub use error::{LinkError, LinkResult};
pub use events::{
    BroadcastEventBridge, ConnectivityEvent, DisconnectReason, EventEmitter, LinkEvent,
    LoggingEventEmitter, NoopEventEmitter, OwnershipEvent, RecoveryEvent,
};
pub use router::{NotificationRouter, SubscriptionId};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{
    ConnectDenied, ConnectReason, MediaActivity, SessionId, SessionManager, SessionState,
    UserIntent,
};
pub use state::{Config, TakeoverPrefs};
pub use transport::{ChannelKind, RemoteAddr, SecureChannel, SecureChannelFactory, StreamChannel};
