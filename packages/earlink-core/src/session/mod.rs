//! Primary-channel session lifecycle.
//!
//! A [`Session`](SessionManager) is one connection attempt/lifetime to the
//! accessory. The manager owns admission (through the
//! [`reconnect`] policy gates), connect-with-timeout, the read loop, and
//! teardown. [`recovery`] reclassifies some remote-initiated drops as
//! recoverable.

mod manager;
pub mod reconnect;
pub mod recovery;

pub use manager::SessionManager;
pub use reconnect::{ConnectDenied, ReconnectState, UserIntent};
pub use recovery::{RecoveryOutcome, TransportRecovery};

use crate::events::DisconnectReason;
use crate::transport::RemoteAddr;

/// Identity of one session lifetime.
///
/// Late callbacks from a superseded session are discarded by comparing
/// this id, never a boolean "connected" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Externally observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The session is established and the read loop is running.
    Connected,
    /// Local teardown was requested; the read loop has not finished yet.
    Closing,
}

/// Why a connect attempt was admitted (logging/diagnostics only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReason {
    /// The user explicitly asked to connect.
    UserRequest,
    /// The platform reported the accessory as present.
    ConnectionDetected,
    /// The arbiter needs a connection to run a takeover.
    Takeover,
    /// A supervised retry after a previous failure.
    Retry,
    /// The radio link came back.
    LinkRestored,
}

impl ConnectReason {
    /// Short identifier for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::ConnectionDetected => "connection_detected",
            Self::Takeover => "takeover",
            Self::Retry => "retry",
            Self::LinkRestored => "link_restored",
        }
    }
}

/// Local media activity snapshot source.
///
/// The manager consults this at teardown time to decide whether a
/// remote-initiated drop should arm the transport-recovery marker. The
/// platform layer implements it; the core never touches actual audio.
pub trait MediaActivity: Send + Sync {
    /// Whether local media playback is currently active.
    fn is_media_active(&self) -> bool;
}

/// Observer for session lifecycle transitions.
///
/// Set after construction (the arbiter and the manager reference each
/// other across this seam). Callbacks run on worker tasks, never on the
/// caller of `connect`/`disconnect`.
pub trait SessionObserver: Send + Sync {
    /// A session reached Connected.
    ///
    /// `resume_playback` is set when a transport-recovery marker was
    /// consumed with an active-media snapshot: the observer should request
    /// a playback resume once audio routing confirms.
    fn on_connected(&self, remote: RemoteAddr, resume_playback: bool);

    /// The session ended.
    fn on_disconnected(&self, remote: RemoteAddr, reason: DisconnectReason);
}
