//! Camera Session Library
//!
//! Lifecycle management for a single industrial camera: discovery,
//! bounded-retry connection, configuration, latest-frame capture and
//! guaranteed release.
//!
//! # Architecture
//!
//! ```text
//! DeviceTransport ──open──▶ Device ──owned by──▶ CameraSession
//!   (enumerate)              (settings,            (retry loop, configure,
//!                             grab results)         capture, close on drop)
//! ```
//!
//! The vendor SDK sits behind the [`transport`] traits. The
//! [`SimulatedTransport`] drives the same session logic without hardware.
//!
//! # Error policy
//!
//! - **Connect**: discovery and open failures are retried with a fixed
//!   delay; only exhaustion is reported
//! - **Configure**: the first rejected setting fails construction, no retry
//! - **Capture**: timeouts are errors, device-reported grab failures are
//!   logged and returned as "no frame"
//!
//! # Example
//!
//! ```no_run
//! use camera_session::{CameraSession, SessionOptions, SimulatedTransport};
//!
//! let mut transport = SimulatedTransport::new();
//! let mut session =
//!     CameraSession::connect(&mut transport, None, &SessionOptions::default()).unwrap();
//!
//! for _ in 0..10 {
//!     if let Some(frame) = session.capture().unwrap() {
//!         println!("frame {} {:?}", frame.sequence(), frame.shape());
//!     }
//! }
//! // Dropping the session stops grabbing and closes the device.
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod metrics;
pub mod session;
pub mod transport;

// Re-export commonly used types at crate root
pub use capture::{BalanceChannel, BalanceRatios, CameraConfig, FileConfig, Frame, PixelFormat};
pub use session::{CameraSession, SessionError, SessionOptions, SessionState};
pub use transport::{Device, DeviceDescriptor, DeviceTransport, SimulatedTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
