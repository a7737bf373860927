// SPDX-License-Identifier: GPL-3.0-only

//! Video sink: owns one encoder for the length of one recording
//!
//! Finalization order is fixed: stop the encoder, release it, and only then
//! hand the container file to storage. A sink is consumed by `stop`; the next
//! recording creates a new encoder.

use super::{EncoderConfig, EncoderFactory, RecordingSummary, VideoEncoder};
use crate::errors::{RecordingError, RenderError};
use crate::gpu::{FrameSink, RenderedFrame};
use crate::storage::MediaStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Forwards presented frames to the encoder and a preview sink
///
/// Preview failures never reach the render loop.
pub struct TeeSink {
    encoder: Arc<dyn FrameSink>,
    preview: Option<Arc<dyn FrameSink>>,
    open: AtomicBool,
}

impl TeeSink {
    pub fn new(encoder: Arc<dyn FrameSink>, preview: Option<Arc<dyn FrameSink>>) -> Self {
        Self {
            encoder,
            preview,
            open: AtomicBool::new(true),
        }
    }

    /// Stop forwarding to the encoder; the preview keeps receiving frames
    pub fn close_encoder(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl FrameSink for TeeSink {
    fn present(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        if self.open.load(Ordering::SeqCst) {
            match &self.preview {
                Some(_) => self.encoder.present(frame.clone())?,
                None => return self.encoder.present(frame),
            }
        }
        if let Some(preview) = &self.preview
            && let Err(e) = preview.present(frame)
        {
            debug!(error = %e, "Preview dropped a recorded frame");
        }
        Ok(())
    }
}

/// A finished, persisted recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedVideo {
    pub path: PathBuf,
    pub summary: RecordingSummary,
}

/// One recording: encoder + muxer writing a temp file, then handed to storage
pub struct VideoSink {
    encoder: Arc<Mutex<Box<dyn VideoEncoder>>>,
    tee: Arc<TeeSink>,
    store: Arc<dyn MediaStore>,
    temp_path: PathBuf,
    started: bool,
}

impl VideoSink {
    /// Create the encoder; frames are not accepted until [`start`](Self::start)
    pub fn create(
        factory: &dyn EncoderFactory,
        config: &EncoderConfig,
        store: Arc<dyn MediaStore>,
        preview: Option<Arc<dyn FrameSink>>,
    ) -> Result<Self, RecordingError> {
        let temp_path = store.temp_video_path(config.codec.extension());
        let encoder = factory.create(config, &temp_path)?;
        let tee = Arc::new(TeeSink::new(encoder.input_surface(), preview));
        debug!(path = %temp_path.display(), "Video sink created");

        Ok(Self {
            encoder: Arc::new(Mutex::new(encoder)),
            tee,
            store,
            temp_path,
            started: false,
        })
    }

    /// Output surface for the recording's rendering context
    pub fn frame_sink(&self) -> Arc<dyn FrameSink> {
        self.tee.clone()
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn start(&mut self) -> Result<(), RecordingError> {
        let result = self.with_encoder(|encoder| encoder.start()).await?;
        if result.is_ok() {
            self.started = true;
        }
        result
    }

    /// Finalize and persist
    ///
    /// Runs to completion once called; the temp file is removed if anything
    /// fails along the way.
    pub async fn stop(self) -> Result<RecordedVideo, RecordingError> {
        self.tee.close_encoder();
        if !self.started {
            self.discard().await;
            return Err(RecordingError::NotRecording);
        }

        let finalized = self
            .with_encoder(|encoder| {
                let summary = encoder.stop();
                encoder.release();
                summary
            })
            .await
            .and_then(|summary| summary);

        let summary = match finalized {
            Ok(summary) => summary,
            Err(e) => {
                remove_temp(&self.temp_path);
                return Err(e);
            }
        };

        let store = Arc::clone(&self.store);
        let temp = self.temp_path.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_video(&temp))
            .await
            .map_err(|e| RecordingError::SaveFailed(format!("Save task error: {}", e)))
            .and_then(|saved| saved);

        match saved {
            Ok(path) => {
                info!(path = %path.display(), frames = summary.frames, tracks = ?summary.tracks, "Recording persisted");
                Ok(RecordedVideo { path, summary })
            }
            Err(e) => {
                remove_temp(&self.temp_path);
                Err(e)
            }
        }
    }

    /// Release the encoder without keeping its output
    pub async fn discard(&self) {
        self.tee.close_encoder();
        let started = self.started;
        let _ = self
            .with_encoder(move |encoder| {
                if started {
                    let _ = encoder.stop();
                }
                encoder.release();
            })
            .await;
        remove_temp(&self.temp_path);
    }

    async fn with_encoder<R, F>(&self, f: F) -> Result<R, RecordingError>
    where
        F: FnOnce(&mut Box<dyn VideoEncoder>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let encoder = Arc::clone(&self.encoder);
        tokio::task::spawn_blocking(move || {
            let mut encoder = encoder.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut *encoder)
        })
        .await
        .map_err(|e| RecordingError::EncoderOrMuxerFailure(format!("Encoder task error: {}", e)))
    }
}

fn remove_temp(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed temporary recording"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary recording"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::Resolution;
    use crate::errors::PhotoError;
    use crate::gpu::PixelLayout;
    use crate::pipelines::photo::EncodedImage;
    use crate::pipelines::video::{TrackKind, VideoCodec};
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl FrameSink for Counter {
        fn present(&self, _frame: RenderedFrame) -> Result<(), RenderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FileEncoder {
        input: Arc<Counter>,
        path: PathBuf,
        fail_stop: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl VideoEncoder for FileEncoder {
        fn input_surface(&self) -> Arc<dyn FrameSink> {
            self.input.clone()
        }

        fn start(&mut self) -> Result<(), RecordingError> {
            self.log.lock().unwrap().push("start");
            std::fs::write(&self.path, b"partial").map_err(RecordingError::from)
        }

        fn stop(&mut self) -> Result<RecordingSummary, RecordingError> {
            self.log.lock().unwrap().push("stop");
            if self.fail_stop {
                return Err(RecordingError::EncoderOrMuxerFailure("muxer".into()));
            }
            Ok(RecordingSummary {
                tracks: vec![TrackKind::Video, TrackKind::Audio],
                frames: self.input.0.load(Ordering::SeqCst),
            })
        }

        fn release(&mut self) {
            self.log.lock().unwrap().push("release");
        }

        fn output_path(&self) -> &Path {
            &self.path
        }
    }

    struct Factory {
        fail_stop: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl EncoderFactory for Factory {
        fn create(
            &self,
            _config: &EncoderConfig,
            output: &Path,
        ) -> Result<Box<dyn VideoEncoder>, RecordingError> {
            Ok(Box::new(FileEncoder {
                input: Arc::new(Counter::default()),
                path: output.to_path_buf(),
                fail_stop: self.fail_stop,
                log: self.log.clone(),
            }))
        }
    }

    struct DirStore {
        dir: PathBuf,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MediaStore for DirStore {
        fn save_image(&self, _image: &EncodedImage) -> Result<PathBuf, PhotoError> {
            unreachable!()
        }

        fn temp_video_path(&self, extension: &str) -> PathBuf {
            self.dir.join(format!("temp.{}", extension))
        }

        fn save_video(&self, temp: &Path) -> Result<PathBuf, RecordingError> {
            self.log.lock().unwrap().push("save");
            let path = self.dir.join("final.mp4");
            std::fs::rename(temp, &path)?;
            Ok(path)
        }
    }

    fn config() -> EncoderConfig {
        EncoderConfig {
            codec: VideoCodec::Avc,
            resolution: Resolution::new(4, 4),
            frame_rate: 30,
            bitrate_bps: 1_000_000,
            extended_range: false,
            record_audio: true,
        }
    }

    fn frame() -> RenderedFrame {
        RenderedFrame {
            width: 4,
            height: 4,
            stride: 256,
            layout: PixelLayout::Rgba8,
            data: Arc::from(vec![0u8; 1024]),
            sequence: 0,
        }
    }

    #[tokio::test]
    async fn test_stop_releases_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = Factory { fail_stop: false, log: log.clone() };
        let store = Arc::new(DirStore { dir: dir.path().to_path_buf(), log: log.clone() });
        let preview = Arc::new(Counter::default());

        let mut sink = VideoSink::create(&factory, &config(), store, Some(preview.clone())).unwrap();
        sink.start().await.unwrap();
        sink.frame_sink().present(frame()).unwrap();
        sink.frame_sink().present(frame()).unwrap();

        let recorded = sink.stop().await.unwrap();
        assert_eq!(recorded.summary.frames, 2);
        assert_eq!(preview.0.load(Ordering::SeqCst), 2);
        assert!(recorded.path.exists());
        assert_eq!(*log.lock().unwrap(), vec!["start", "stop", "release", "save"]);
    }

    #[tokio::test]
    async fn test_failed_stop_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = Factory { fail_stop: true, log: log.clone() };
        let store = Arc::new(DirStore { dir: dir.path().to_path_buf(), log: log.clone() });

        let mut sink = VideoSink::create(&factory, &config(), store, None).unwrap();
        sink.start().await.unwrap();
        let temp = sink.temp_path().to_path_buf();
        assert!(temp.exists());

        let err = sink.stop().await.unwrap_err();
        assert!(matches!(err, RecordingError::EncoderOrMuxerFailure(_)));
        assert!(!temp.exists());
        assert_eq!(*log.lock().unwrap(), vec!["start", "stop", "release"]);
    }

    #[tokio::test]
    async fn test_closed_tee_keeps_preview() {
        let encoder = Arc::new(Counter::default());
        let preview = Arc::new(Counter::default());
        let tee = TeeSink::new(encoder.clone(), Some(preview.clone()));
        tee.present(frame()).unwrap();
        tee.close_encoder();
        tee.present(frame()).unwrap();
        assert_eq!(encoder.0.load(Ordering::SeqCst), 1);
        assert_eq!(preview.0.load(Ordering::SeqCst), 2);
    }
}
