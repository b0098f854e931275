//! Transport-recovery marker.
//!
//! Not every remote-initiated drop is a genuine disconnect: some firmware
//! revisions cycle the channel during handoffs, and unconditionally
//! stopping playback on every drop degrades the experience. When a session
//! ends with end-of-stream while local media was active, a short-lived
//! marker is armed; a reconnect to the same remote inside the TTL turns
//! into a playback resume instead of a cold start.
//!
//! The marker is one explicit tagged state, not a bag of booleans and
//! timestamps, so the illegal combinations (armed without a timestamp,
//! snapshot without a remote) cannot be represented.

use tokio::time::Instant;

use crate::protocol_constants::TRANSPORT_RECOVERY_TTL;
use crate::transport::RemoteAddr;

/// Outcome of checking the marker on a successful reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Marker was armed for this remote, inside the TTL, with media active
    /// at drop time: request a resume once routing confirms.
    Resume,
    /// Marker matched but media was not active at drop time.
    NoResume,
    /// Marker had expired; it is cleared silently.
    Expired,
    /// No marker was armed for this remote.
    NotArmed,
}

/// Reclassifies some remote-initiated drops as recoverable.
#[derive(Debug, Default)]
pub enum TransportRecovery {
    /// No drop pending reclassification.
    #[default]
    Idle,
    /// A remote-initiated drop is pending reclassification.
    Armed {
        /// The remote the session was connected to when it dropped.
        remote: RemoteAddr,
        /// When the marker was armed.
        armed_at: Instant,
        /// Whether local media was active at drop time.
        was_media_active: bool,
    },
}

impl TransportRecovery {
    /// Arms the marker for a remote. Overwrites any previous marker.
    pub fn arm(&mut self, remote: RemoteAddr, was_media_active: bool, now: Instant) {
        *self = Self::Armed {
            remote,
            armed_at: now,
            was_media_active,
        };
    }

    /// Whether a fresh marker is armed for this remote.
    ///
    /// Used to attribute a link-layer drop to a recoverable cause, which
    /// shortens reconnect suppression.
    #[must_use]
    pub fn is_armed_for(&self, remote: RemoteAddr, now: Instant) -> bool {
        match self {
            Self::Armed {
                remote: armed_remote,
                armed_at,
                ..
            } => {
                *armed_remote == remote
                    && now.saturating_duration_since(*armed_at) < TRANSPORT_RECOVERY_TTL
            }
            Self::Idle => false,
        }
    }

    /// Consumes the marker on a successful reconnect to `remote`.
    ///
    /// Always returns the marker to `Idle` when it matched, whatever the
    /// outcome: one drop buys at most one resume.
    pub fn consume(&mut self, remote: RemoteAddr, now: Instant) -> RecoveryOutcome {
        match *self {
            Self::Armed {
                remote: armed_remote,
                armed_at,
                was_media_active,
            } if armed_remote == remote => {
                *self = Self::Idle;
                if now.saturating_duration_since(armed_at) >= TRANSPORT_RECOVERY_TTL {
                    RecoveryOutcome::Expired
                } else if was_media_active {
                    RecoveryOutcome::Resume
                } else {
                    RecoveryOutcome::NoResume
                }
            }
            _ => RecoveryOutcome::NotArmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn remote() -> RemoteAddr {
        RemoteAddr::new([0xA0, 0, 0, 0, 0, 1])
    }

    #[test]
    fn reconnect_inside_ttl_with_media_active_resumes() {
        let t0 = Instant::now();
        let mut recovery = TransportRecovery::default();
        recovery.arm(remote(), true, t0);

        let outcome = recovery.consume(remote(), t0 + Duration::from_secs(3));
        assert_eq!(outcome, RecoveryOutcome::Resume);
        // Consumed: a second reconnect gets nothing.
        assert_eq!(
            recovery.consume(remote(), t0 + Duration::from_secs(4)),
            RecoveryOutcome::NotArmed
        );
    }

    #[test]
    fn reconnect_after_ttl_expires_silently() {
        let t0 = Instant::now();
        let mut recovery = TransportRecovery::default();
        recovery.arm(remote(), true, t0);

        let outcome = recovery.consume(remote(), t0 + Duration::from_secs(20));
        assert_eq!(outcome, RecoveryOutcome::Expired);
    }

    #[test]
    fn inactive_snapshot_never_resumes() {
        let t0 = Instant::now();
        let mut recovery = TransportRecovery::default();
        recovery.arm(remote(), false, t0);

        assert_eq!(
            recovery.consume(remote(), t0 + Duration::from_secs(1)),
            RecoveryOutcome::NoResume
        );
    }

    #[test]
    fn marker_is_keyed_by_remote() {
        let t0 = Instant::now();
        let other = RemoteAddr::new([0xB0, 0, 0, 0, 0, 2]);
        let mut recovery = TransportRecovery::default();
        recovery.arm(remote(), true, t0);

        assert_eq!(
            recovery.consume(other, t0 + Duration::from_secs(1)),
            RecoveryOutcome::NotArmed
        );
        // Marker for the original remote survives a mismatched consume.
        assert_eq!(
            recovery.consume(remote(), t0 + Duration::from_secs(2)),
            RecoveryOutcome::Resume
        );
    }

    #[test]
    fn armed_for_respects_ttl() {
        let t0 = Instant::now();
        let mut recovery = TransportRecovery::default();
        recovery.arm(remote(), true, t0);

        assert!(recovery.is_armed_for(remote(), t0 + Duration::from_secs(14)));
        assert!(!recovery.is_armed_for(remote(), t0 + Duration::from_secs(15)));
    }
}
