//! Session error types.

use super::SessionState;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Reason a single connection attempt failed. Always retried.
#[derive(Debug, Clone, Error)]
pub enum ConnectFailure {
    /// Discovery returned an empty list.
    #[error("no cameras detected, check the connection")]
    NoDevices,
    /// Discovery or open failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by a camera session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Every connection attempt failed. The session is unusable.
    #[error("failed to connect after {attempts} attempt(s)")]
    ConnectExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: ConnectFailure,
    },
    /// A setting was rejected after connecting. Not retried.
    #[error("failed to apply camera setting {setting}")]
    Configure {
        /// Parameter node that was rejected.
        setting: &'static str,
        /// Device error for the write.
        #[source]
        source: TransportError,
    },
    /// No grab result arrived in time. The stored frame is untouched.
    #[error("no grab result within {timeout:?}")]
    CaptureTimeout {
        /// Wait that elapsed.
        timeout: Duration,
    },
    /// The call needs an open device.
    #[error("session is {state}, a connected camera is required")]
    NotConnected {
        /// State at the time of the call.
        state: SessionState,
    },
    /// The grab result could not be decoded. It was still released.
    #[error("failed to convert grab result")]
    Conversion(#[source] TransportError),
    /// Any other device error.
    #[error("device error")]
    Transport(#[source] TransportError),
}

impl SessionError {
    /// True for errors that leave the session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectExhausted { .. } | SessionError::Configure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_exhausted_message_leaves_cause_to_source() {
        let err = SessionError::ConnectExhausted {
            attempts: 2,
            last: ConnectFailure::NoDevices,
        };

        assert_eq!(err.to_string(), "failed to connect after 2 attempt(s)");
        let cause = err.source().map(|cause| cause.to_string());
        assert_eq!(cause.as_deref(), Some("no cameras detected, check the connection"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_configure_error_chain() {
        let err = SessionError::Configure {
            setting: "Gain",
            source: TransportError::Parameter {
                node: "Gain",
                reason: "value out of range".into(),
            },
        };

        assert_eq!(err.to_string(), "failed to apply camera setting Gain");
        let cause = err.source().map(|cause| cause.to_string());
        assert_eq!(cause.as_deref(), Some("device rejected Gain: value out of range"));
    }
}
