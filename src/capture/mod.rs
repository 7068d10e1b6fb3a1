//! Camera configuration and image types.
//!
//! This module holds the value types that flow through a session: the
//! sensor configuration applied after connecting, the raw images a
//! device hands back and the decoded frames the session keeps.

mod config;
mod convert;
mod frame;

pub use config::{
    BalanceChannel, BalanceRatios, CameraConfig, ConfigError, FileConfig, OutputConfig,
    PixelFormat, SessionConfig, DEFAULT_MAX_BUFFERS,
};
pub use convert::{ConvertError, ImageConverter, RawImage};
pub use frame::{Frame, FrameExportError, CHANNELS};
