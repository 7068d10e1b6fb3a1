//! Frame type representing a decoded image with metadata.

use chrono::{DateTime, Utc};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Interleaved channels per pixel in a decoded frame (B, G, R).
pub const CHANNELS: usize = 3;

/// Errors when exporting a frame to an image file.
#[derive(Debug, Error)]
pub enum FrameExportError {
    /// The pixel buffer length disagrees with the dimensions.
    #[error("pixel buffer does not match {width}x{height} frame dimensions")]
    InvalidBuffer {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
    /// Encoding or writing failed.
    #[error("failed to encode image: {0}")]
    Image(#[from] image::ImageError),
}

/// A single decoded frame.
///
/// Pixels are BGR8 packed: three bytes per pixel, row major, no padding.
#[derive(Clone)]
pub struct Frame {
    /// Packed BGR pixel data.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Wall-clock capture time.
    captured_at: DateTime<Utc>,
    /// Monotonic sequence number within a session.
    sequence: u64,
    /// Driver buffer the frame was decoded from.
    buffer_id: u64,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at: Utc::now(),
            sequence,
            buffer_id: 0,
        }
    }

    /// Tags the frame with the driver buffer it came from.
    pub fn with_buffer_id(mut self, buffer_id: u64) -> Self {
        self.buffer_id = buffer_id;
        self
    }

    /// Returns a reference to the packed BGR pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Frame width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Wall-clock capture time.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Sequence number within the session.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Driver buffer the frame was decoded from.
    #[inline]
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    /// Array shape as `(rows, columns, channels)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, CHANNELS)
    }

    /// Element type of the pixel buffer.
    pub fn element_type(&self) -> &'static str {
        "u8"
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.pixel_count() * CHANNELS
    }

    /// Returns the `[b, g, r]` triple at a position.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * CHANNELS;
        let bgr = self.pixels.get(offset..offset + CHANNELS)?;
        Some([bgr[0], bgr[1], bgr[2]])
    }

    /// Converts to an RGB image buffer.
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameExportError> {
        if !self.is_valid() {
            return Err(self.invalid_buffer());
        }
        let rgb: Vec<u8> = self
            .pixels
            .chunks_exact(CHANNELS)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect();
        RgbImage::from_raw(self.width, self.height, rgb).ok_or_else(|| self.invalid_buffer())
    }

    /// Writes the frame as a PNG file.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), FrameExportError> {
        let image = self.to_rgb_image()?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    fn invalid_buffer(&self) -> FrameExportError {
        FrameExportError::InvalidBuffer {
            width: self.width,
            height: self.height,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("buffer_id", &self.buffer_id)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let pixels = vec![0u8; 640 * 480 * 3];
        let frame = Frame::new(pixels, 640, 480, 1).with_buffer_id(7);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.buffer_id(), 7);
        assert_eq!(frame.shape(), (480, 640, 3));
        assert!(frame.is_valid());
    }

    #[test]
    fn test_frame_invalid_size() {
        let pixels = vec![0u8; 640 * 480]; // single channel
        let frame = Frame::new(pixels, 640, 480, 1);

        assert!(!frame.is_valid());
        assert!(matches!(
            frame.to_rgb_image(),
            Err(FrameExportError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn test_rgb_export_swaps_channels() {
        let frame = Frame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, 1);
        assert_eq!(frame.pixel(1, 0), Some([40, 50, 60]));
        assert_eq!(frame.pixel(2, 0), None);

        let image = frame.to_rgb_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(image.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::new(vec![128u8; 4 * 4 * 3], 4, 4, 1);

        frame.save_png(&path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (4, 4));
    }
}
