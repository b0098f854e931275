//! Reconnect admission policy.
//!
//! Pure decision logic: four independent gates that admit or reject a
//! connection attempt. No I/O, no clocks of its own — callers pass `now`,
//! which keeps the policy simulatable per remote in tests. One
//! [`ReconnectState`] exists per remote and outlives individual sessions;
//! all mutation happens under the session manager's exclusion domain.
//!
//! The failure and remote-close gates share a delay table but are modeled
//! separately: an accepted-then-immediately-closed channel (protocol-level
//! rejection) is a different failure mode than a connect-time failure, and
//! the two must not reset each other.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol_constants::{
    BACKOFF_TABLE, CONNECT_DEBOUNCE, LINK_SUPPRESSION, LINK_SUPPRESSION_RECOVERABLE,
    REMOTE_CLOSE_STREAK_WINDOW, SECURITY_BACKOFF_FLOOR, USER_INTENT_BACKOFF_CLAMP,
};

/// User-intent signals that justify resetting or clamping backoff.
///
/// These are the only events besides a successful connect that touch
/// accumulated backoff; an unexpected close never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIntent {
    /// The user put the accessory in their ear.
    EarInserted,
    /// The case lid opened and no pairing key is stored yet.
    LidOpenedUnpaired,
    /// The user explicitly asked this device to take the audio route.
    ManualTakeover,
}

/// Why a connect attempt was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDenied {
    /// A session is already Connected.
    AlreadyConnected,
    /// A connect attempt is already in flight.
    AlreadyConnecting,
    /// Inside failure backoff.
    FailureBackoff {
        /// Time until the gate opens.
        remaining: Duration,
    },
    /// Inside remote-close backoff.
    RemoteCloseBackoff {
        /// Time until the gate opens.
        remaining: Duration,
    },
    /// Inside link-layer suppression.
    LinkSuppressed {
        /// Time until the gate opens.
        remaining: Duration,
    },
    /// Too soon after the previous attempt.
    Debounced {
        /// Time until the gate opens.
        remaining: Duration,
    },
}

/// Per-remote reconnect bookkeeping. Persists across sessions.
#[derive(Debug, Default)]
pub struct ReconnectState {
    /// Consecutive connect failures since the last success or user intent.
    failures: u32,
    failure_backoff_until: Option<Instant>,

    /// Length of the current unexpected-close streak.
    remote_close_streak: u32,
    last_remote_close_at: Option<Instant>,
    remote_close_backoff_until: Option<Instant>,

    link_suppressed_until: Option<Instant>,
    last_link_up_at: Option<Instant>,
    last_link_down_at: Option<Instant>,

    last_attempt_at: Option<Instant>,
}

/// Returns the backoff delay for a 1-based consecutive failure count,
/// saturating at the last tier.
#[must_use]
pub fn backoff_delay(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let idx = (failures as usize - 1).min(BACKOFF_TABLE.len() - 1);
    BACKOFF_TABLE[idx]
}

fn remaining(until: Option<Instant>, now: Instant) -> Option<Duration> {
    let until = until?;
    if until > now {
        Some(until - now)
    } else {
        None
    }
}

impl ReconnectState {
    /// Creates fresh state for a remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates the four admission gates.
    ///
    /// Manual attempts bypass failure backoff, remote-close backoff and the
    /// debounce gate, but never link-layer suppression. The
    /// already-connected/already-connecting exclusion is the session
    /// manager's job and is not checked here.
    pub fn admit(&self, now: Instant, manual: bool) -> Result<(), ConnectDenied> {
        if !manual {
            if let Some(remaining) = remaining(self.failure_backoff_until, now) {
                return Err(ConnectDenied::FailureBackoff { remaining });
            }
            if let Some(remaining) = remaining(self.remote_close_backoff_until, now) {
                return Err(ConnectDenied::RemoteCloseBackoff { remaining });
            }
        }
        if let Some(remaining) = remaining(self.link_suppressed_until, now) {
            return Err(ConnectDenied::LinkSuppressed { remaining });
        }
        if !manual {
            if let Some(last) = self.last_attempt_at {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < CONNECT_DEBOUNCE {
                    return Err(ConnectDenied::Debounced {
                        remaining: CONNECT_DEBOUNCE - elapsed,
                    });
                }
            }
        }
        Ok(())
    }

    /// Records an admitted connect attempt (for the debounce gate).
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt_at = Some(now);
    }

    /// Records a connect-time failure and extends failure backoff.
    ///
    /// The backoff deadline is monotonic non-decreasing while failures
    /// accumulate. A security/permission failure floors the delay.
    pub fn record_failure(&mut self, now: Instant, security: bool) {
        self.failures = self.failures.saturating_add(1);
        let mut delay = backoff_delay(self.failures);
        if security {
            delay = delay.max(SECURITY_BACKOFF_FLOOR);
        }
        let candidate = now + delay;
        self.failure_backoff_until = Some(match self.failure_backoff_until {
            Some(existing) => existing.max(candidate),
            None => candidate,
        });
    }

    /// Resets failure backoff after a successful connect.
    ///
    /// Only success (or a user-intent signal) resets the counter; an
    /// unexpected remote close never does.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.failure_backoff_until = None;
    }

    /// Records an unexpected remote-initiated close.
    ///
    /// The streak increments when the previous close was inside the 60 s
    /// window, else restarts at 1. The delay table is the same one used for
    /// connect failures.
    pub fn record_remote_close(&mut self, now: Instant) {
        let within_window = self
            .last_remote_close_at
            .is_some_and(|t| now.saturating_duration_since(t) < REMOTE_CLOSE_STREAK_WINDOW);
        self.remote_close_streak = if within_window {
            self.remote_close_streak.saturating_add(1)
        } else {
            1
        };
        self.last_remote_close_at = Some(now);
        let candidate = now + backoff_delay(self.remote_close_streak);
        self.remote_close_backoff_until = Some(match self.remote_close_backoff_until {
            Some(existing) => existing.max(candidate),
            None => candidate,
        });
    }

    /// Records a link-layer (radio) connect.
    pub fn record_link_up(&mut self, now: Instant) {
        self.last_link_up_at = Some(now);
        self.link_suppressed_until = None;
    }

    /// Records a link-layer (radio) disconnect and starts suppression.
    ///
    /// `recovery_attributed` shortens the suppression when the drop is
    /// attributed to a just-armed transport-recovery cause.
    pub fn record_link_down(&mut self, now: Instant, recovery_attributed: bool) {
        self.last_link_down_at = Some(now);
        let window = if recovery_attributed {
            LINK_SUPPRESSION_RECOVERABLE
        } else {
            LINK_SUPPRESSION
        };
        self.link_suppressed_until = Some(now + window);
    }

    /// Applies a user-intent signal.
    ///
    /// Failure backoff resets fully; remote-close backoff is clamped to at
    /// most 1.5 s remaining, never fully cleared.
    pub fn apply_user_intent(&mut self, now: Instant, intent: UserIntent) {
        log::debug!("[Reconnect] User intent {:?}: resetting backoff", intent);
        self.failures = 0;
        self.failure_backoff_until = None;
        if let Some(until) = self.remote_close_backoff_until {
            let clamp = now + USER_INTENT_BACKOFF_CLAMP;
            self.remote_close_backoff_until = Some(until.min(clamp));
        }
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Current unexpected-close streak length.
    #[must_use]
    pub fn remote_close_streak(&self) -> u32 {
        self.remote_close_streak
    }
}
