// SPDX-License-Identifier: GPL-3.0-only

//! Video recording pipeline
//!
//! The render loop presents composited frames into the encoder's input
//! surface; the encoder muxes them with microphone audio into an MP4 file.
//!
//! ```text
//! render loop → TeeSink ─┬─▶ appsrc → videoconvert → encoder → parser ─┐
//!                        │                                           mp4mux → file
//!                        │   audio src → convert → resample → AAC ───┘
//!                        └─▶ preview sink
//! ```
//!
//! Encoders sit behind [`VideoEncoder`] / [`EncoderFactory`] so the sink can
//! be driven without GStreamer plugins installed.

pub mod encoder_selection;
pub mod recorder;
pub mod sink;

pub use recorder::{GstEncoderFactory, GstVideoEncoder};
pub use sink::{RecordedVideo, TeeSink, VideoSink};

use crate::backends::camera::Resolution;
use crate::config::CameraSettings;
use crate::errors::RecordingError;
use crate::gpu::FrameSink;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Video codecs the recorder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoCodec {
    /// H.264
    #[default]
    Avc,
    /// H.265
    Hevc,
}

impl VideoCodec {
    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "h264parse",
            VideoCodec::Hevc => "h265parse",
        }
    }

    /// Container extension; both codecs go into MP4
    pub fn extension(&self) -> &'static str {
        "mp4"
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::Avc => write!(f, "H.264"),
            VideoCodec::Hevc => write!(f, "H.265"),
        }
    }
}

/// Elementary streams in a finished recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Everything an encoder needs to know up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub bitrate_bps: u32,
    /// Input frames are 10-bit RGB10A2 instead of RGBA8
    pub extended_range: bool,
    pub record_audio: bool,
}

impl EncoderConfig {
    pub fn from_settings(settings: &CameraSettings, record_audio: bool) -> Self {
        Self {
            codec: settings.video_codec,
            resolution: settings.output_resolution(),
            frame_rate: settings.effective_frame_rate(),
            bitrate_bps: settings.bitrate_bps(),
            extended_range: settings.extended_range,
            record_audio,
        }
    }
}

/// What an encoder produced once stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub tracks: Vec<TrackKind>,
    pub frames: u64,
}

/// An encoder + muxer pair writing one container file
///
/// `stop` and `release` may block while the pipeline drains.
pub trait VideoEncoder: Send {
    /// Surface the render loop presents frames into
    fn input_surface(&self) -> Arc<dyn FrameSink>;

    /// Begin accepting frames
    fn start(&mut self) -> Result<(), RecordingError>;

    /// Stop accepting frames and finalize the container
    fn stop(&mut self) -> Result<RecordingSummary, RecordingError>;

    /// Free the encoder; the file is complete once this returns
    fn release(&mut self);

    fn output_path(&self) -> &Path;
}

/// Creates a fresh encoder per recording
pub trait EncoderFactory: Send + Sync {
    fn create(
        &self,
        config: &EncoderConfig,
        output: &Path,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError>;
}
