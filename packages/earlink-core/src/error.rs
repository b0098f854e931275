//! Centralized error types for the Earlink core library.
//!
//! The accessory protocol has a small, fixed failure taxonomy: a connection
//! attempt can fail or time out, an established channel can die under us,
//! and the attribute sub-protocol can stop answering. Everything here maps
//! to one of those cases; payload-level semantics are out of scope.

use std::time::Duration;

use thiserror::Error;

/// Application-wide error type for accessory link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No usable transport (radio off, adapter missing, factory refused).
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A connect attempt exceeded the hard timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A connect attempt failed before the timeout.
    ///
    /// `security` marks the distinguished security/permission failure class
    /// (missing link key, rejected pairing). The reconnect policy floors the
    /// backoff delay for this class.
    #[error("connect failed: {reason}")]
    ConnectFailed {
        /// Human-readable failure description.
        reason: String,
        /// Whether this was a security/permission failure.
        security: bool,
    },

    /// The remote closed the channel while no local teardown was pending.
    #[error("unexpected close: {0}")]
    UnexpectedClose(String),

    /// The attribute channel produced no response within the fixed window.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// A malformed frame was received. Logged and dropped; never fatal to
    /// the reader.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Underlying channel I/O error.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Returns a machine-readable error code for logs and event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::UnexpectedClose(_) => "unexpected_close",
            Self::ResponseTimeout(_) => "response_timeout",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether this error belongs to the security/permission failure class.
    ///
    /// The reconnect policy treats these differently: retrying quickly will
    /// not help when the accessory is refusing our link key.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, Self::ConnectFailed { security: true, .. })
    }

    /// Whether this error terminates a connect attempt (as opposed to a
    /// per-request attribute failure).
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_)
                | Self::ConnectTimeout(_)
                | Self::ConnectFailed { .. }
        )
    }
}

/// Convenient Result alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_failure_is_flagged() {
        let err = LinkError::ConnectFailed {
            reason: "link key rejected".into(),
            security: true,
        };
        assert_eq!(err.code(), "connect_failed");
        assert!(err.is_security());
        assert!(err.is_connect_failure());
    }

    #[test]
    fn response_timeout_is_not_a_connect_failure() {
        let err = LinkError::ResponseTimeout(Duration::from_secs(2));
        assert_eq!(err.code(), "response_timeout");
        assert!(!err.is_security());
        assert!(!err.is_connect_failure());
    }
}
