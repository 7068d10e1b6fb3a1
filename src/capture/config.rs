//! Camera configuration.
//!
//! Exposure and gain are applied as fixed values with the automatic
//! loops switched off, so every frame in a session is taken under the
//! same sensor settings.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default number of buffers the driver may allocate for grabbing.
pub const DEFAULT_MAX_BUFFERS: u32 = 5;

/// White balance channel addressed by the balance ratio selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceChannel {
    /// Red channel.
    Red,
    /// Green channel.
    Green,
    /// Blue channel.
    Blue,
}

impl BalanceChannel {
    /// Returns the selector token understood by the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceChannel::Red => "Red",
            BalanceChannel::Green => "Green",
            BalanceChannel::Blue => "Blue",
        }
    }
}

impl fmt::Display for BalanceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceChannel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Red" => Ok(BalanceChannel::Red),
            "Green" => Ok(BalanceChannel::Green),
            "Blue" => Ok(BalanceChannel::Blue),
            other => Err(ConfigError::UnknownChannel(other.to_string())),
        }
    }
}

/// Per-channel white balance ratios.
///
/// Entries keep the order in which they were inserted (or written in a
/// config file), which is the order they are applied to the device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BalanceRatios(Vec<(BalanceChannel, f64)>);

impl BalanceRatios {
    /// Creates an empty ratio set. Applying it leaves the device ratios alone.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Sets the ratio for a channel.
    ///
    /// An existing channel keeps its position; a new channel is appended.
    pub fn set(&mut self, channel: BalanceChannel, ratio: f64) -> &mut Self {
        match self.0.iter_mut().find(|(c, _)| *c == channel) {
            Some(entry) => entry.1 = ratio,
            None => self.0.push((channel, ratio)),
        }
        self
    }

    /// Builder form of [`BalanceRatios::set`].
    pub fn with(mut self, channel: BalanceChannel, ratio: f64) -> Self {
        self.set(channel, ratio);
        self
    }

    /// Returns the ratio for a channel, if present.
    pub fn get(&self, channel: BalanceChannel) -> Option<f64> {
        self.0.iter().find(|(c, _)| *c == channel).map(|(_, r)| *r)
    }

    /// Iterates entries in application order.
    pub fn iter(&self) -> impl Iterator<Item = (BalanceChannel, f64)> + '_ {
        self.0.iter().copied()
    }

    /// Number of channels with a ratio.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no channel has a ratio.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(BalanceChannel, f64)> for BalanceRatios {
    fn from_iter<I: IntoIterator<Item = (BalanceChannel, f64)>>(iter: I) -> Self {
        let mut ratios = BalanceRatios::empty();
        for (channel, ratio) in iter {
            ratios.set(channel, ratio);
        }
        ratios
    }
}

impl Serialize for BalanceRatios {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (channel, ratio) in &self.0 {
            map.serialize_entry(channel.as_str(), ratio)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BalanceRatios {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RatiosVisitor;

        impl<'de> Visitor<'de> for RatiosVisitor {
            type Value = BalanceRatios;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of Red/Green/Blue balance ratios")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut ratios = BalanceRatios::empty();
                while let Some((key, ratio)) = access.next_entry::<String, f64>()? {
                    let channel = key.parse::<BalanceChannel>().map_err(de::Error::custom)?;
                    ratios.set(channel, ratio);
                }
                Ok(ratios)
            }
        }

        deserializer.deserialize_map(RatiosVisitor)
    }
}

/// Sensor pixel format token.
///
/// Known tokens get their own variant; anything else is passed through to
/// the device verbatim and rejected there if unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// Bayer mosaic, red first.
    BayerRG8,
    /// Bayer mosaic, green then red.
    BayerGR8,
    /// Bayer mosaic, green then blue.
    BayerGB8,
    /// Bayer mosaic, blue first.
    BayerBG8,
    /// Packed 8-bit RGB.
    Rgb8Packed,
    /// Packed 8-bit BGR.
    Bgr8Packed,
    /// Any other device token.
    Other(String),
}

impl PixelFormat {
    /// Returns the device token for this format.
    pub fn as_str(&self) -> &str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::Rgb8Packed => "RGB8Packed",
            PixelFormat::Bgr8Packed => "BGR8Packed",
            PixelFormat::Other(token) => token,
        }
    }

    /// Bytes per pixel for known formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRG8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerBG8 => Some(1),
            PixelFormat::Rgb8Packed | PixelFormat::Bgr8Packed => Some(3),
            PixelFormat::Other(_) => None,
        }
    }

    /// True for single-plane Bayer mosaics.
    pub fn is_bayer(&self) -> bool {
        matches!(
            self,
            PixelFormat::BayerRG8 | PixelFormat::BayerGR8 | PixelFormat::BayerGB8 | PixelFormat::BayerBG8
        )
    }
}

impl From<&str> for PixelFormat {
    fn from(token: &str) -> Self {
        match token {
            "Mono8" => PixelFormat::Mono8,
            "BayerRG8" => PixelFormat::BayerRG8,
            "BayerGR8" => PixelFormat::BayerGR8,
            "BayerGB8" => PixelFormat::BayerGB8,
            "BayerBG8" => PixelFormat::BayerBG8,
            "RGB8Packed" | "RGB8" => PixelFormat::Rgb8Packed,
            "BGR8Packed" | "BGR8" => PixelFormat::Bgr8Packed,
            other => PixelFormat::Other(other.to_string()),
        }
    }
}

impl From<String> for PixelFormat {
    fn from(token: String) -> Self {
        PixelFormat::from(token.as_str())
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.as_str().to_string()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor settings applied once after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Fixed exposure time in microseconds.
    pub exposure_time: u32,
    /// Analog gain (camera-specific units).
    pub gain: f64,
    /// Manual white balance ratios, applied in order.
    pub balance_ratios: BalanceRatios,
    /// Sensor output format.
    pub pixel_format: PixelFormat,
    /// Upper bound on buffers allocated for grabbing.
    pub max_buffers: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            exposure_time: 10000, // 10ms
            gain: 10.0,
            balance_ratios: BalanceRatios::empty()
                .with(BalanceChannel::Red, 1.5)
                .with(BalanceChannel::Green, 1.0)
                .with(BalanceChannel::Blue, 1.0),
            pixel_format: PixelFormat::BayerRG8,
            max_buffers: DEFAULT_MAX_BUFFERS,
        }
    }
}

impl CameraConfig {
    /// Creates the default configuration with a different exposure time.
    pub fn with_exposure(exposure_time: u32) -> Self {
        Self {
            exposure_time,
            ..Default::default()
        }
    }

    /// Checks values a driver would certainly reject.
    ///
    /// The session never calls this; it is a sanity check for configs
    /// that come from files or the command line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exposure_time == 0 {
            return Err(ConfigError::InvalidExposure);
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConfigError::InvalidGain(self.gain));
        }
        for (channel, ratio) in self.balance_ratios.iter() {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(ConfigError::InvalidBalanceRatio { channel, ratio });
            }
        }
        if self.max_buffers == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Exposure time of zero.
    #[error("invalid exposure time")]
    InvalidExposure,
    /// Negative or non-finite gain.
    #[error("invalid gain: {0}")]
    InvalidGain(f64),
    /// Non-positive or non-finite ratio.
    #[error("invalid balance ratio {ratio} for channel {channel}")]
    InvalidBalanceRatio {
        /// Channel the ratio was given for.
        channel: BalanceChannel,
        /// Rejected value.
        ratio: f64,
    },
    /// Channel name other than Red, Green or Blue.
    #[error("unknown balance channel: {0}")]
    UnknownChannel(String),
    /// Buffer count of zero.
    #[error("max buffer count must be at least 1")]
    InvalidBufferCount,
    /// Negative or non-finite retry delay.
    #[error("invalid retry delay: {0}")]
    InvalidRetryDelay(f64),
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// `[camera]` table.
    #[serde(default)]
    pub camera: CameraConfig,
    /// `[session]` table.
    #[serde(default)]
    pub session: SessionConfig,
    /// `[output]` table.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Connection retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connection attempts before giving up.
    pub max_retries: u32,
    /// Fixed wait between attempts, in seconds.
    pub retry_delay_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay_secs: 1.0,
        }
    }
}

impl SessionConfig {
    /// Rejects a negative or non-finite retry delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry_delay_secs.is_finite() || self.retry_delay_secs < 0.0 {
            return Err(ConfigError::InvalidRetryDelay(self.retry_delay_secs));
        }
        Ok(())
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Capture until interrupted (true) or a fixed number of frames (false).
    pub continuous: bool,
    /// Number of frames to capture if not continuous.
    pub frame_count: u32,
    /// Directory for PNG snapshots; nothing is written when unset.
    pub output_dir: Option<PathBuf>,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            frame_count: 10,
            output_dir: None,
            metrics_port: 9090,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.camera.validate()?;
        config.session.validate()?;
        Ok(config)
    }
}
