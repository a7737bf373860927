// SPDX-License-Identifier: GPL-3.0-only

//! Async photo encoding
//!
//! - JPEG (with quality control)
//! - PNG (lossless)
//!
//! Encoding runs on the blocking pool so the caller's runtime keeps going.

use crate::errors::PhotoError;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Supported encoding formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingFormat {
    /// JPEG format (lossy compression)
    #[default]
    Jpeg,
    /// PNG format (lossless compression)
    Png,
}

impl EncodingFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg => "jpg",
            EncodingFormat::Png => "png",
        }
    }

    fn to_image_format(self) -> ImageFormat {
        match self {
            EncodingFormat::Jpeg => ImageFormat::Jpeg,
            EncodingFormat::Png => ImageFormat::Png,
        }
    }
}

/// Encoded image data ready for saving
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub format: EncodingFormat,
    pub width: u32,
    pub height: u32,
}

/// Photo encoder
#[derive(Debug, Clone, Copy)]
pub struct PhotoEncoder {
    format: EncodingFormat,
    jpeg_quality: u8,
}

impl PhotoEncoder {
    pub fn new(format: EncodingFormat, jpeg_quality: u8) -> Self {
        Self {
            format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    /// Encode a tightly packed RGBA image
    pub async fn encode(&self, image: RgbaImage) -> Result<EncodedImage, PhotoError> {
        let (width, height) = image.dimensions();
        info!(width, height, format = ?self.format, "Starting encoding");

        let format = self.format;
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || {
            let data = match format {
                EncodingFormat::Jpeg => Self::encode_jpeg(&image, quality)?,
                EncodingFormat::Png => Self::encode_png(&image)?,
            };

            debug!(size = data.len(), "Encoding complete");

            Ok(EncodedImage {
                data,
                format,
                width,
                height,
            })
        })
        .await
        .map_err(|e| PhotoError::EncodingFailed(format!("Encoding task error: {}", e)))?
    }

    /// Encode image as JPEG; alpha is dropped
    fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, PhotoError> {
        let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);

        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality);

        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| PhotoError::EncodingFailed(format!("JPEG encoding failed: {}", e)))?;

        Ok(buffer)
    }

    /// Encode image as PNG
    fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PhotoError> {
        let mut buffer = Vec::new();

        image
            .write_to(
                &mut std::io::Cursor::new(&mut buffer),
                EncodingFormat::Png.to_image_format(),
            )
            .map_err(|e| PhotoError::EncodingFailed(format!("PNG encoding failed: {}", e)))?;

        Ok(buffer)
    }
}

impl Default for PhotoEncoder {
    fn default() -> Self {
        Self::new(EncodingFormat::Jpeg, 92)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image() -> RgbaImage {
        RgbaImage::from_pixel(16, 8, image::Rgba([10, 200, 30, 255]))
    }

    #[tokio::test]
    async fn test_png_is_lossless() {
        let encoder = PhotoEncoder::new(EncodingFormat::Png, 90);
        let encoded = encoder.encode(test_image()).await.unwrap();
        assert_eq!((encoded.width, encoded.height), (16, 8));

        let decoded = image::load_from_memory(&encoded.data).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3).0, [10, 200, 30, 255]);
    }

    #[tokio::test]
    async fn test_jpeg_header() {
        let encoded = PhotoEncoder::default().encode(test_image()).await.unwrap();
        assert_eq!(encoded.format, EncodingFormat::Jpeg);
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(EncodingFormat::Jpeg.extension(), "jpg");
        assert_eq!(EncodingFormat::Png.extension(), "png");
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(PhotoEncoder::new(EncodingFormat::Jpeg, 0).jpeg_quality, 1);
        assert_eq!(PhotoEncoder::new(EncodingFormat::Jpeg, 250).jpeg_quality, 100);
    }
}
