//! Device transport abstraction.
//!
//! Everything the session needs from a camera SDK sits behind two
//! traits: [`DeviceTransport`] discovers and opens devices, [`Device`]
//! is the opened handle. Real hardware and the [`SimulatedTransport`]
//! used in tests and demos implement the same surface.

#[cfg(feature = "camera")]
mod native;
mod simulated;
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
mod worker;

#[cfg(feature = "camera")]
pub use native::{NativeDevice, NativeTransport};
pub use simulated::{CallLog, DeviceEvent, GrabScript, ScriptedGrab, SimulatedDevice, SimulatedTransport};

use crate::capture::{BalanceChannel, ConvertError, Frame, ImageConverter, PixelFormat, RawImage};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a transport or an opened device.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Device discovery failed.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
    /// The device could not be opened.
    #[error("failed to open device: {0}")]
    Open(String),
    /// A parameter write was rejected.
    #[error("device rejected {node}: {reason}")]
    Parameter {
        /// Parameter node name.
        node: &'static str,
        /// Device-reported reason.
        reason: String,
    },
    /// Starting, stopping or reading the stream failed.
    #[error("acquisition error: {0}")]
    Acquisition(String),
    /// No result arrived within the given wait.
    #[error("no grab result within {0:?}")]
    Timeout(Duration),
    /// The device was already closed.
    #[error("device is not open")]
    NotOpen,
    /// Image decoding failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),
    /// Teardown failed.
    #[error("failed to close device: {0}")]
    Close(String),
}

/// Identity of a discovered device. Produced by enumeration, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    model_name: String,
    address: Option<String>,
    serial_number: String,
}

impl DeviceDescriptor {
    /// Descriptor without a network address.
    pub fn new(model_name: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            address: None,
            serial_number: serial_number.into(),
        }
    }

    /// Sets the network address (GigE devices).
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Vendor model name.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Network address, if any.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Serial number, unique per device.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) serial {}",
            self.model_name,
            self.address.as_deref().unwrap_or("no address"),
            self.serial_number
        )
    }
}

/// Automatic control loop mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMode {
    /// Manual control.
    Off,
    /// Run the control loop once, then switch to `Off`.
    Once,
    /// Keep adjusting while grabbing.
    Continuous,
}

impl AutoMode {
    /// Enumeration entry name as written to the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoMode::Off => "Off",
            AutoMode::Once => "Once",
            AutoMode::Continuous => "Continuous",
        }
    }
}

/// How queued frames are handed out while grabbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStrategy {
    /// Frames are delivered in acquisition order.
    OneByOne,
    /// Only the most recent frame is kept; older undelivered frames are dropped.
    LatestImageOnly,
}

/// A single device parameter write.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    /// Analog gain.
    Gain(f64),
    /// Automatic white balance.
    BalanceWhiteAuto(AutoMode),
    /// Channel the next `BalanceRatio` applies to.
    BalanceRatioSelector(BalanceChannel),
    /// Ratio for the selected channel.
    BalanceRatio(f64),
    /// Sensor output format.
    PixelFormat(PixelFormat),
    /// Automatic exposure.
    ExposureAuto(AutoMode),
    /// Microseconds.
    ExposureTime(u32),
    /// Driver buffer pool size.
    MaxNumBuffer(u32),
}

impl Setting {
    /// Parameter node name as exposed by the device.
    pub fn node(&self) -> &'static str {
        match self {
            Setting::Gain(_) => "Gain",
            Setting::BalanceWhiteAuto(_) => "BalanceWhiteAuto",
            Setting::BalanceRatioSelector(_) => "BalanceRatioSelector",
            Setting::BalanceRatio(_) => "BalanceRatio",
            Setting::PixelFormat(_) => "PixelFormat",
            Setting::ExposureAuto(_) => "ExposureAuto",
            Setting::ExposureTime(_) => "ExposureTime",
            Setting::MaxNumBuffer(_) => "MaxNumBuffer",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Gain(v) | Setting::BalanceRatio(v) => write!(f, "{}={}", self.node(), v),
            Setting::BalanceWhiteAuto(m) | Setting::ExposureAuto(m) => {
                write!(f, "{}={}", self.node(), m.as_str())
            }
            Setting::BalanceRatioSelector(c) => write!(f, "{}={}", self.node(), c),
            Setting::PixelFormat(p) => write!(f, "{}={}", self.node(), p),
            Setting::ExposureTime(v) | Setting::MaxNumBuffer(v) => write!(f, "{}={}", self.node(), v),
        }
    }
}

/// Device-reported reason a grab produced no image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabFailure {
    /// Vendor error code.
    pub code: u32,
    /// Vendor error text.
    pub description: String,
}

impl GrabFailure {
    /// Builds a failure from a code and its description.
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl fmt::Display for GrabFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.description)
    }
}

/// Outcome carried by a grab result.
#[derive(Debug, Clone, PartialEq)]
pub enum GrabOutcome {
    /// The buffer holds an image.
    Image(RawImage),
    /// The device reported a failed grab.
    Failed(GrabFailure),
}

/// A driver buffer handed out by [`Device::retrieve_result`].
///
/// The buffer slot stays reserved until the result is passed back to
/// [`Device::release_result`]. Release consumes the result, so a result
/// can be released at most once.
#[derive(Debug)]
pub struct GrabResult {
    buffer_id: u64,
    outcome: GrabOutcome,
}

impl GrabResult {
    /// Wraps a filled buffer slot.
    pub fn new(buffer_id: u64, outcome: GrabOutcome) -> Self {
        Self { buffer_id, outcome }
    }

    /// Driver buffer slot.
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    /// What the buffer holds.
    pub fn outcome(&self) -> &GrabOutcome {
        &self.outcome
    }

    /// True when the buffer holds an image.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, GrabOutcome::Image(_))
    }
}

/// Discovery and opening of devices.
pub trait DeviceTransport {
    /// Handle type produced by [`DeviceTransport::open`].
    type Device: Device;

    /// Lists attached devices. An empty list is not an error here.
    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Opens a previously enumerated device.
    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<Self::Device, TransportError>;
}

/// An opened camera.
pub trait Device {
    /// Identity the device was opened from.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// False once [`Device::close`] has run.
    fn is_open(&self) -> bool;

    /// Writes one parameter.
    fn apply(&mut self, setting: &Setting) -> Result<(), TransportError>;

    /// True while acquisition is running. Must have no side effects.
    fn is_grabbing(&self) -> bool;

    /// Starts acquisition.
    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<(), TransportError>;

    /// Stops acquisition.
    fn stop_grabbing(&mut self) -> Result<(), TransportError>;

    /// Blocks for the next result, failing with [`TransportError::Timeout`]
    /// once `timeout` has elapsed.
    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, TransportError>;

    /// Returns the result's buffer slot to the driver.
    fn release_result(&mut self, result: GrabResult);

    /// Decodes a raw image into a BGR8 packed frame.
    fn convert(
        &self,
        image: &RawImage,
        converter: &ImageConverter,
        sequence: u64,
    ) -> Result<Frame, TransportError> {
        Ok(converter.convert(image, sequence)?)
    }

    /// Releases the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}
