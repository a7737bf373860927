// SPDX-License-Identifier: GPL-3.0-only

//! Still image sink: captured buffer → tight RGBA → encoded file

use super::encoding::{EncodedImage, PhotoEncoder};
use super::reader::CapturedBuffer;
use crate::backends::camera::Resolution;
use crate::errors::PhotoError;
use crate::storage::MediaStore;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Persists one composited still per capture
pub struct ImageSink {
    encoder: PhotoEncoder,
    store: Arc<dyn MediaStore>,
    output: Resolution,
}

impl ImageSink {
    pub fn new(encoder: PhotoEncoder, store: Arc<dyn MediaStore>, output: Resolution) -> Self {
        Self {
            encoder,
            store,
            output,
        }
    }

    /// Strip row padding down to the output resolution; closes `buffer`
    pub fn extract(&self, buffer: CapturedBuffer) -> Result<RgbaImage, PhotoError> {
        let (frame_width, frame_height) = (buffer.frame().width, buffer.frame().height);
        let width = self.output.width.min(frame_width);
        let height = self.output.height.min(frame_height);
        debug!(
            frame_width,
            frame_height,
            stride = buffer.frame().stride,
            width,
            height,
            "Extracting still image"
        );

        let rgba = buffer.frame().to_rgba8();
        buffer.close();

        let full = RgbaImage::from_raw(frame_width, frame_height, rgba)
            .ok_or_else(|| PhotoError::CaptureFailed("rendered frame is truncated".into()))?;
        if (width, height) == (frame_width, frame_height) {
            return Ok(full);
        }
        Ok(image::imageops::crop_imm(&full, 0, 0, width, height).to_image())
    }

    /// Extract, encode and persist; returns where the photo was written
    pub async fn consume(&self, buffer: CapturedBuffer) -> Result<PathBuf, PhotoError> {
        let image = self.extract(buffer)?;
        let encoded: EncodedImage = self.encoder.encode(image).await?;

        let store = Arc::clone(&self.store);
        let path = tokio::task::spawn_blocking(move || store.save_image(&encoded))
            .await
            .map_err(|e| PhotoError::SaveFailed(format!("Save task error: {}", e)))??;

        info!(path = %path.display(), "Still image persisted");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RecordingError;
    use crate::gpu::{FrameSink, PixelLayout, RenderedFrame};
    use crate::pipelines::photo::{EncodingFormat, ImageReader};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore(Mutex<Vec<EncodedImage>>);

    impl MediaStore for MemoryStore {
        fn save_image(&self, image: &EncodedImage) -> Result<PathBuf, PhotoError> {
            self.0.lock().unwrap().push(image.clone());
            Ok(PathBuf::from("memory.png"))
        }

        fn temp_video_path(&self, extension: &str) -> PathBuf {
            PathBuf::from(format!("memory.{}", extension))
        }

        fn save_video(&self, temp: &Path) -> Result<PathBuf, RecordingError> {
            Ok(temp.to_path_buf())
        }
    }

    fn padded_frame(width: u32, height: u32, color: [u8; 4]) -> RenderedFrame {
        let stride = 256;
        let mut data = vec![0xAAu8; (stride * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let at = (y * stride + x * 4) as usize;
                data[at..at + 4].copy_from_slice(&color);
            }
        }
        RenderedFrame {
            width,
            height,
            stride,
            layout: PixelLayout::Rgba8,
            data: Arc::from(data),
            sequence: 1,
        }
    }

    #[tokio::test]
    async fn test_padding_is_removed_and_buffer_closed() {
        let reader = ImageReader::new(Resolution::new(6, 4), 2);
        reader.present(padded_frame(6, 4, [9, 8, 7, 255])).unwrap();

        let store = Arc::new(MemoryStore::default());
        let sink = ImageSink::new(
            PhotoEncoder::new(EncodingFormat::Png, 90),
            store.clone(),
            Resolution::new(6, 4),
        );
        sink.consume(reader.acquire_latest().unwrap()).await.unwrap();
        assert_eq!(reader.outstanding(), 0);
        assert_eq!(reader.closed_count(), 1);

        let saved = store.0.lock().unwrap();
        assert_eq!(saved.len(), 1);
        let decoded = image::load_from_memory(&saved[0].data).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert!(decoded.pixels().all(|p| p.0 == [9, 8, 7, 255]));
    }

    #[test]
    fn test_extract_crops_to_output() {
        let reader = ImageReader::new(Resolution::new(8, 8), 2);
        reader.present(padded_frame(8, 8, [1, 2, 3, 255])).unwrap();

        let sink = ImageSink::new(
            PhotoEncoder::default(),
            Arc::new(MemoryStore::default()),
            Resolution::new(5, 3),
        );
        let image = sink.extract(reader.acquire_latest().unwrap()).unwrap();
        assert_eq!(image.dimensions(), (5, 3));
    }
}
