// SPDX-License-Identifier: GPL-3.0-only

//! Storage for finished photos and recordings
//!
//! [`MediaStore`] is the persistence collaborator the sinks hand their output
//! to. [`FileMediaStore`] writes timestamped files into the pictures and videos
//! directories.

use crate::errors::{PhotoError, RecordingError};
use crate::pipelines::photo::EncodedImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where photos and recordings end up
pub trait MediaStore: Send + Sync {
    /// Persist an encoded still image, returning its final location
    fn save_image(&self, image: &EncodedImage) -> Result<PathBuf, PhotoError>;

    /// Scratch location an encoder may write a container file to
    fn temp_video_path(&self, extension: &str) -> PathBuf;

    /// Take ownership of a finalized recording at `temp`
    fn save_video(&self, temp: &Path) -> Result<PathBuf, RecordingError>;
}

/// Default photo directory: `~/Pictures/dual-camera`
pub fn default_photos_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Pictures"))
        .join("dual-camera")
}

/// Default video directory: `~/Videos/dual-camera`
pub fn default_videos_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join("Videos"))
        .join("dual-camera")
}

/// Timestamped file name, e.g. `photo_20240101_120000_123.jpg`
pub fn timestamped_name(prefix: &str, extension: &str) -> String {
    let now = chrono::Local::now();
    format!("{}_{}.{}", prefix, now.format("%Y%m%d_%H%M%S_%3f"), extension)
}

/// Stores media as plain files
#[derive(Debug, Clone)]
pub struct FileMediaStore {
    photos_dir: PathBuf,
    videos_dir: PathBuf,
}

impl FileMediaStore {
    pub fn new(photos_dir: PathBuf, videos_dir: PathBuf) -> Self {
        Self {
            photos_dir,
            videos_dir,
        }
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }
}

impl Default for FileMediaStore {
    fn default() -> Self {
        Self::new(default_photos_dir(), default_videos_dir())
    }
}

impl MediaStore for FileMediaStore {
    fn save_image(&self, image: &EncodedImage) -> Result<PathBuf, PhotoError> {
        std::fs::create_dir_all(&self.photos_dir)
            .map_err(|e| PhotoError::SaveFailed(format!("Failed to create directory: {}", e)))?;

        let path = self
            .photos_dir
            .join(timestamped_name("photo", image.format.extension()));
        std::fs::write(&path, &image.data)
            .map_err(|e| PhotoError::SaveFailed(format!("Failed to write file: {}", e)))?;

        info!(path = %path.display(), size = image.data.len(), "Photo saved");
        Ok(path)
    }

    fn temp_video_path(&self, extension: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            ".dual-camera-{}.{}",
            uuid::Uuid::new_v4(),
            extension
        ))
    }

    fn save_video(&self, temp: &Path) -> Result<PathBuf, RecordingError> {
        std::fs::create_dir_all(&self.videos_dir)
            .map_err(|e| RecordingError::SaveFailed(format!("Failed to create directory: {}", e)))?;

        let extension = temp
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let path = self.videos_dir.join(timestamped_name("video", extension));

        // Rename fails across filesystems; fall back to copy + remove
        if std::fs::rename(temp, &path).is_err() {
            debug!(from = %temp.display(), to = %path.display(), "Rename failed, copying");
            std::fs::copy(temp, &path)
                .map_err(|e| RecordingError::SaveFailed(format!("Failed to copy file: {}", e)))?;
            let _ = std::fs::remove_file(temp);
        }

        info!(path = %path.display(), "Video saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::photo::EncodingFormat;

    #[test]
    fn test_save_image_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMediaStore::new(dir.path().join("photos"), dir.path().join("videos"));
        let image = EncodedImage {
            data: vec![1, 2, 3],
            format: EncodingFormat::Png,
            width: 1,
            height: 1,
        };

        let path = store.save_image(&image).unwrap();
        assert!(path.starts_with(dir.path().join("photos")));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_save_video_moves_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMediaStore::new(dir.path().join("photos"), dir.path().join("videos"));
        let temp = dir.path().join("scratch.mp4");
        std::fs::write(&temp, b"mp4").unwrap();

        let path = store.save_video(&temp).unwrap();
        assert!(!temp.exists());
        assert_eq!(path.extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(&path).unwrap(), b"mp4");
    }

    #[test]
    fn test_temp_video_paths_are_unique() {
        let store = FileMediaStore::default();
        assert_ne!(store.temp_video_path("mp4"), store.temp_video_path("mp4"));
    }

    #[test]
    fn test_timestamped_name() {
        let name = timestamped_name("photo", "jpg");
        assert!(name.starts_with("photo_"));
        assert!(name.ends_with(".jpg"));
    }
}
