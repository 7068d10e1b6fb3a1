//! Sensor-native to BGR8 conversion.
//!
//! All supported inputs are 8 bits per sample, so MSB alignment of the
//! output is the identity. Bayer mosaics are reconstructed per 2x2 cell:
//! every pixel in a cell receives the cell's red sample, the mean of its
//! two green samples and its blue sample.

use super::{Frame, PixelFormat, CHANNELS};
use thiserror::Error;

/// Errors from pixel format conversion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// No conversion exists for this format.
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),
    /// The buffer is shorter than width x height x bytes per pixel.
    #[error("buffer holds {actual} bytes, {expected} required")]
    BufferSize {
        /// Bytes the image dimensions require.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },
}

/// Sensor-native image carried by a successful grab.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Sensor format of `data`.
    pub pixel_format: PixelFormat,
    /// Row-major sample bytes.
    pub data: Vec<u8>,
}

impl RawImage {
    /// Wraps a sensor buffer.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cfa {
    Red,
    Green,
    Blue,
}

/// Colour filter layout of the top-left 2x2 cell, indexed `[row][column]`.
fn cfa_layout(format: &PixelFormat) -> Option<[[Cfa; 2]; 2]> {
    use Cfa::*;
    match format {
        PixelFormat::BayerRG8 => Some([[Red, Green], [Green, Blue]]),
        PixelFormat::BayerGR8 => Some([[Green, Red], [Blue, Green]]),
        PixelFormat::BayerGB8 => Some([[Green, Blue], [Red, Green]]),
        PixelFormat::BayerBG8 => Some([[Blue, Green], [Green, Red]]),
        _ => None,
    }
}

/// Converts raw sensor buffers to packed BGR8 frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

impl ImageConverter {
    /// Creates a converter.
    pub fn new() -> Self {
        Self
    }

    /// Output pixel format of every converted frame.
    pub fn output_format(&self) -> PixelFormat {
        PixelFormat::Bgr8Packed
    }

    /// Converts a raw image into a frame with the given sequence number.
    pub fn convert(&self, raw: &RawImage, sequence: u64) -> Result<Frame, ConvertError> {
        let bytes_per_pixel = raw
            .pixel_format
            .bytes_per_pixel()
            .ok_or_else(|| ConvertError::UnsupportedPixelFormat(raw.pixel_format.to_string()))?;
        let pixel_count = (raw.width as usize) * (raw.height as usize);
        let expected = pixel_count * bytes_per_pixel;
        if raw.data.len() < expected {
            return Err(ConvertError::BufferSize {
                expected,
                actual: raw.data.len(),
            });
        }
        let data = &raw.data[..expected];

        let pixels = match &raw.pixel_format {
            PixelFormat::Bgr8Packed => data.to_vec(),
            PixelFormat::Rgb8Packed => data
                .chunks_exact(CHANNELS)
                .flat_map(|rgb| [rgb[2], rgb[1], rgb[0]])
                .collect(),
            PixelFormat::Mono8 => data.iter().flat_map(|&v| [v, v, v]).collect(),
            format if format.is_bayer() => {
                let layout = cfa_layout(format)
                    .ok_or_else(|| ConvertError::UnsupportedPixelFormat(format.to_string()))?;
                demosaic(data, raw.width as usize, raw.height as usize, &layout)
            }
            format => return Err(ConvertError::UnsupportedPixelFormat(format.to_string())),
        };

        Ok(Frame::new(pixels, raw.width, raw.height, sequence))
    }
}

fn demosaic(data: &[u8], width: usize, height: usize, layout: &[[Cfa; 2]; 2]) -> Vec<u8> {
    let mut out = vec![0u8; width * height * CHANNELS];

    for y in 0..height {
        let cell_y = y & !1;
        for x in 0..width {
            let cell_x = x & !1;
            let (mut red, mut green, mut blue) = (0u16, 0u16, 0u16);

            for (dy, row) in layout.iter().enumerate() {
                // Odd trailing rows/columns reuse the last sample.
                let sy = (cell_y + dy).min(height - 1);
                for (dx, colour) in row.iter().enumerate() {
                    let sx = (cell_x + dx).min(width - 1);
                    let sample = u16::from(data[sy * width + sx]);
                    match colour {
                        Cfa::Red => red = sample,
                        Cfa::Green => green += sample,
                        Cfa::Blue => blue = sample,
                    }
                }
            }

            let offset = (y * width + x) * CHANNELS;
            out[offset] = blue as u8;
            out[offset + 1] = (green / 2) as u8;
            out[offset + 2] = red as u8;
        }
    }

    out
}
