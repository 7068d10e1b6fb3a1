//! Session state and counters.

use std::fmt;
use std::time::Duration;

/// Fixed wait for a single grab result.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of connection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default fixed wait between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle state of a camera session.
///
/// ```text
/// Disconnected → Connecting → Connected ⇄ Grabbing
///        any state → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device has been opened yet.
    Disconnected,
    /// The retry loop is running.
    Connecting,
    /// Device open and configured, not acquiring.
    Connected,
    /// Acquisition is running.
    Grabbing,
    /// Device released. Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Grabbing => "grabbing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Connection retry policy.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Connection attempts before giving up. Zero is treated as one.
    pub max_retries: u32,
    /// Fixed wait between attempts. Not applied after the last attempt.
    pub retry_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SessionOptions {
    /// Policy with an explicit attempt count and delay.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Attempts actually made by the retry loop.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl From<&crate::capture::SessionConfig> for SessionOptions {
    fn from(config: &crate::capture::SessionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::try_from_secs_f64(config.retry_delay_secs)
                .unwrap_or(DEFAULT_RETRY_DELAY),
        }
    }
}

/// Running counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Connection attempts made while constructing the session.
    pub connect_attempts: u32,
    /// Frames decoded and stored.
    pub frames_captured: u64,
    /// Grabs the device reported as failed.
    pub grab_failures: u64,
    /// Captures that hit the result timeout.
    pub capture_timeouts: u64,
}
