// SPDX-License-Identifier: GPL-3.0-only

//! Shared doubles for the orchestrator tests

#![allow(dead_code)]

use dual_camera::app::{Collaborators, Orchestrator, OrchestratorOptions};
use dual_camera::backends::camera::{CameraFacing, Resolution};
use dual_camera::backends::virtual_camera::{VirtualCamera, VirtualCaptureService, VirtualStats};
use dual_camera::config::CameraSettings;
use dual_camera::errors::{RecordingError, RenderError};
use dual_camera::gpu::{FrameSink, OutputTarget, RenderedFrame, RendererKind};
use dual_camera::pipelines::photo::EncodingFormat;
use dual_camera::pipelines::video::{
    EncoderConfig, EncoderFactory, RecordingSummary, TrackKind, VideoEncoder,
};
use dual_camera::storage::FileMediaStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FRONT_COLOR: [u8; 4] = [0, 160, 160, 255];
pub const BACK_COLOR: [u8; 4] = [240, 120, 0, 255];

/// Small frames keep the CPU compositor fast
pub const TEST_SIZE: Resolution = Resolution::new(64, 48);

/// Counts presented frames
#[derive(Default)]
pub struct FrameCounter {
    frames: AtomicU64,
}

impl FrameCounter {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl FrameSink for FrameCounter {
    fn present(&self, _frame: RenderedFrame) -> Result<(), RenderError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeEncoder {
    input: Arc<FrameCounter>,
    config: EncoderConfig,
    path: PathBuf,
    stop_delay: Duration,
}

impl VideoEncoder for FakeEncoder {
    fn input_surface(&self) -> Arc<dyn FrameSink> {
        self.input.clone()
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        std::fs::write(&self.path, b"").map_err(RecordingError::from)
    }

    fn stop(&mut self) -> Result<RecordingSummary, RecordingError> {
        std::thread::sleep(self.stop_delay);
        let frames = self.input.frames();
        std::fs::write(&self.path, format!("frames={}", frames)).map_err(RecordingError::from)?;
        let mut tracks = vec![TrackKind::Video];
        if self.config.record_audio {
            tracks.push(TrackKind::Audio);
        }
        Ok(RecordingSummary { tracks, frames })
    }

    fn release(&mut self) {}

    fn output_path(&self) -> &Path {
        &self.path
    }
}

/// Writes a small text file per recording and counts the frames it was fed
#[derive(Default)]
pub struct FakeEncoderFactory {
    configs: Mutex<Vec<EncoderConfig>>,
    inputs: Mutex<Vec<Arc<FrameCounter>>>,
    stop_delay: Mutex<Duration>,
}

impl FakeEncoderFactory {
    /// Make encoders created from now on take `delay` to finalize
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = delay;
    }

    pub fn configs(&self) -> Vec<EncoderConfig> {
        self.configs.lock().unwrap().clone()
    }

    /// Frames presented to the most recent encoder
    pub fn last_frames(&self) -> u64 {
        self.inputs.lock().unwrap().last().map(|c| c.frames()).unwrap_or(0)
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        output: &Path,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError> {
        let input = Arc::new(FrameCounter::default());
        self.configs.lock().unwrap().push(*config);
        self.inputs.lock().unwrap().push(input.clone());
        Ok(Box::new(FakeEncoder {
            input,
            config: *config,
            path: output.to_path_buf(),
            stop_delay: *self.stop_delay.lock().unwrap(),
        }))
    }
}

pub fn small_settings() -> CameraSettings {
    CameraSettings {
        front_resolution: TEST_SIZE,
        back_resolution: TEST_SIZE,
        frame_rate: 60,
        ..CameraSettings::default()
    }
}

pub fn test_options() -> OrchestratorOptions {
    OrchestratorOptions {
        renderer: RendererKind::Software,
        photo_format: EncodingFormat::Png,
        ..OrchestratorOptions::default()
    }
}

pub fn default_cameras() -> Vec<VirtualCamera> {
    vec![
        VirtualCamera::new("virtual-front", CameraFacing::Front, FRONT_COLOR),
        VirtualCamera::new("virtual-back", CameraFacing::Back, BACK_COLOR),
    ]
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub stats: Arc<VirtualStats>,
    pub encoders: Arc<FakeEncoderFactory>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(cameras: Vec<VirtualCamera>) -> Self {
        Self::with_options(cameras, test_options())
    }

    pub fn with_options(cameras: Vec<VirtualCamera>, options: OrchestratorOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(VirtualCaptureService::new(cameras));
        let stats = service.stats();
        let encoders = Arc::new(FakeEncoderFactory::default());
        let store = FileMediaStore::new(dir.path().join("photos"), dir.path().join("videos"));
        let orchestrator = Orchestrator::new(
            options,
            small_settings(),
            Collaborators {
                capture: service,
                store: Arc::new(store),
                encoders: encoders.clone(),
            },
        );
        Self {
            orchestrator,
            stats,
            encoders,
            dir,
        }
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.dir.path().join("photos")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }
}

pub fn preview_target(counter: &Arc<FrameCounter>) -> OutputTarget {
    OutputTarget::new("test-preview", TEST_SIZE, counter.clone())
}

/// Files directly inside `dir`, none if it does not exist
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Poll `condition` until it holds or three seconds pass
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
