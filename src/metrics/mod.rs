//! Prometheus metrics for camera sessions.
//!
//! # Metrics Exposed
//!
//! - `camera_session_grabbing` - Acquisition status (1=grabbing, 0=idle)
//! - `camera_session_connect_attempts_total` - Connection attempts made
//! - `camera_session_frames_captured_total` - Frames captured and decoded
//! - `camera_session_grab_failures_total` - Device-reported grab failures
//! - `camera_session_capture_timeouts_total` - Captures that timed out
//!
//! With the `metrics` feature, [`MetricsServer`] serves them over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use camera_session::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! registry.update(&MetricsSnapshot {
//!     is_grabbing: true,
//!     connect_attempts: 2,
//!     frames_captured: 120,
//!     grab_failures: 1,
//!     capture_timeouts: 0,
//! });
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
