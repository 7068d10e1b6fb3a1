//! Camera session: connection, configuration, capture and release.
//!
//! Connection failures are absorbed by a bounded retry loop and only
//! surfaced once every attempt has failed. Configuration failures and
//! capture timeouts surface immediately. Failed grabs are logged and
//! reported as "no frame" so a capture loop can keep going.

mod camera;
mod error;
mod state;

pub use camera::{configuration_sequence, CameraSession};
pub use error::{ConnectFailure, SessionError};
pub use state::{
    SessionOptions, SessionState, SessionStats, CAPTURE_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY,
};
