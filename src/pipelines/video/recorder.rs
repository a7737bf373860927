// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer encoder + muxer fed from composited frames
//!
//! ```text
//! appsrc → queue → videoconvert → encoder → parser ─┐
//!                                                  mp4mux → filesink
//! audio src → queue → audioconvert → resample → AAC ┘
//! ```
//!
//! The audio branch is optional: without a microphone or an AAC encoder the
//! file only carries video.

use super::encoder_selection::{select_audio_encoder, select_video_encoder};
use super::{EncoderConfig, EncoderFactory, RecordingSummary, TrackKind, VideoEncoder};
use crate::backends::camera::Resolution;
use crate::constants::timing::{ENCODER_STOP_TIMEOUT, FRAME_LOG_INTERVAL};
use crate::errors::{RecordingError, RenderError};
use crate::gpu::{FrameSink, RenderedFrame};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// How long `start` watches the bus for immediate failures
const START_ERROR_WINDOW_MS: u64 = 500;

/// The encoder's input surface: pushes presented frames into appsrc
struct AppSrcInput {
    appsrc: gst_app::AppSrc,
    resolution: Resolution,
    accepting: AtomicBool,
    frames: AtomicU64,
}

impl FrameSink for AppSrcInput {
    fn present(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Ok(());
        }
        if (frame.width, frame.height) != (self.resolution.width, self.resolution.height) {
            return Err(RenderError::Fatal(format!(
                "frame {}x{} does not match encoder input {}",
                frame.width, frame.height, self.resolution
            )));
        }

        let buffer = gst::Buffer::from_mut_slice(frame.tight_rows());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RenderError::Fatal(format!("encoder rejected frame: {:?}", e)))?;

        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % FRAME_LOG_INTERVAL == 0 {
            debug!(frames = count, "Frames pushed to encoder");
        }
        Ok(())
    }
}

/// Records composited frames (and microphone audio) into an MP4 file
pub struct GstVideoEncoder {
    pipeline: gst::Pipeline,
    input: Arc<AppSrcInput>,
    audio_source: Option<gst::Element>,
    tracks: Vec<TrackKind>,
    output: PathBuf,
    running: bool,
}

impl GstVideoEncoder {
    pub fn new(config: &EncoderConfig, output: &Path) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| {
            RecordingError::EncoderOrMuxerFailure(format!("Failed to initialize GStreamer: {}", e))
        })?;

        let format = if config.extended_range {
            gst_video::VideoFormat::Rgb10a2Le
        } else {
            gst_video::VideoFormat::Rgba
        };
        let caps = gst_video::VideoInfo::builder(
            format,
            config.resolution.width,
            config.resolution.height,
        )
        .fps(gst::Fraction::new(config.frame_rate as i32, 1))
        .build()
        .and_then(|info| info.to_caps())
        .map_err(|e| failure("input caps", e))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("composite-input")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(true)
            .build();
        appsrc.set_do_timestamp(true);

        let queue = make("queue")?;
        let convert = make("videoconvert")?;
        let selected = select_video_encoder(config.codec, config.bitrate_bps)?;
        let muxer = make("mp4mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", output.to_string_lossy().to_string())
            .build()
            .map_err(|e| failure("filesink", e))?;

        let pipeline = gst::Pipeline::with_name("dual-camera-recorder");
        let video_chain = [
            appsrc.upcast_ref(),
            &queue,
            &convert,
            &selected.encoder,
            &selected.parser,
            &muxer,
            &filesink,
        ];
        pipeline
            .add_many(video_chain)
            .map_err(|e| failure("adding video elements", e))?;
        gst::Element::link_many(video_chain).map_err(|e| failure("linking video chain", e))?;

        let mut tracks = vec![TrackKind::Video];
        let audio_source = if config.record_audio {
            match add_audio_branch(&pipeline, &muxer) {
                Ok(source) => {
                    tracks.push(TrackKind::Audio);
                    Some(source)
                }
                Err(e) => {
                    warn!(error = %e, "Recording without audio");
                    None
                }
            }
        } else {
            None
        };

        info!(
            path = %output.display(),
            resolution = %config.resolution,
            fps = config.frame_rate,
            codec = %config.codec,
            encoder = selected.info.element_name,
            bitrate = config.bitrate_bps,
            audio = audio_source.is_some(),
            "Recording pipeline created"
        );

        Ok(Self {
            pipeline,
            input: Arc::new(AppSrcInput {
                appsrc,
                resolution: config.resolution,
                accepting: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
            audio_source,
            tracks,
            output: output.to_path_buf(),
            running: false,
        })
    }

    fn check_bus_for_error(&self, timeout_ms: u64) -> Result<(), RecordingError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(timeout_ms),
            &[gst::MessageType::Error],
        ) && let gst::MessageView::Error(err) = msg.view()
        {
            error!(
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "GStreamer error during start"
            );
            return Err(RecordingError::EncoderOrMuxerFailure(err.error().to_string()));
        }
        Ok(())
    }

    /// Wait for EOS to reach the sink, or an error on the way
    fn drain(&self) -> Result<(), RecordingError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| RecordingError::EncoderOrMuxerFailure("pipeline has no bus".into()))?;
        let timeout = gst::ClockTime::from_mseconds(ENCODER_STOP_TIMEOUT.as_millis() as u64);
        match bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(..) => Ok(()),
                gst::MessageView::Error(err) => Err(RecordingError::EncoderOrMuxerFailure(
                    format!("{} ({:?})", err.error(), err.debug()),
                )),
                _ => Ok(()),
            },
            None => Err(RecordingError::EncoderOrMuxerFailure(
                "timed out waiting for the muxer to finish".into(),
            )),
        }
    }
}

impl VideoEncoder for GstVideoEncoder {
    fn input_surface(&self) -> Arc<dyn FrameSink> {
        self.input.clone()
    }

    fn start(&mut self) -> Result<(), RecordingError> {
        info!(path = %self.output.display(), "Starting video recording");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| failure("starting pipeline", e))?;

        if let Err(e) = self.check_bus_for_error(START_ERROR_WINDOW_MS) {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        self.running = true;
        self.input.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<RecordingSummary, RecordingError> {
        if !self.running {
            return Err(RecordingError::NotRecording);
        }
        self.running = false;
        self.input.accepting.store(false, Ordering::SeqCst);
        info!(path = %self.output.display(), "Stopping video recording");

        if let Err(e) = self.input.appsrc.end_of_stream() {
            warn!(?e, "Failed to end video stream");
        }
        if let Some(source) = &self.audio_source
            && !source.send_event(gst::event::Eos::new())
        {
            warn!("Failed to send EOS to audio source");
        }

        let drained = self.drain();
        let _ = self.pipeline.set_state(gst::State::Null);
        drained?;

        let frames = self.input.frames.load(Ordering::SeqCst);
        info!(path = %self.output.display(), frames, "Recording finalized");
        Ok(RecordingSummary {
            tracks: self.tracks.clone(),
            frames,
        })
    }

    fn release(&mut self) {
        self.input.accepting.store(false, Ordering::SeqCst);
        let _ = self.pipeline.set_state(gst::State::Null);
        debug!(path = %self.output.display(), "Recording pipeline released");
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}

impl Drop for GstVideoEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Creates [`GstVideoEncoder`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEncoderFactory;

impl EncoderFactory for GstEncoderFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        output: &Path,
    ) -> Result<Box<dyn VideoEncoder>, RecordingError> {
        Ok(Box::new(GstVideoEncoder::new(config, output)?))
    }
}

fn make(name: &str) -> Result<gst::Element, RecordingError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| failure(name, e))
}

fn failure(what: &str, e: impl std::fmt::Display) -> RecordingError {
    RecordingError::EncoderOrMuxerFailure(format!("{}: {}", what, e))
}

/// Microphone → AAC → `muxer`; returns the source element
fn add_audio_branch(
    pipeline: &gst::Pipeline,
    muxer: &gst::Element,
) -> Result<gst::Element, RecordingError> {
    let source = gst::ElementFactory::make("pipewiresrc")
        .property("do-timestamp", true)
        .build()
        .or_else(|_| gst::ElementFactory::make("autoaudiosrc").build())
        .map_err(|e| failure("audio source", e))?;
    let queue = gst::ElementFactory::make("queue")
        .property("max-size-time", 2_000_000_000u64)
        .build()
        .map_err(|e| failure("audio queue", e))?;
    let convert = make("audioconvert")?;
    let resample = make("audioresample")?;
    let encoder = select_audio_encoder()?;

    let chain = [&source, &queue, &convert, &resample, &encoder];
    pipeline
        .add_many(chain)
        .map_err(|e| failure("adding audio elements", e))?;
    let linked = gst::Element::link_many(chain).and_then(|()| encoder.link(muxer));
    if let Err(e) = linked {
        let _ = pipeline.remove_many(chain);
        return Err(failure("linking audio chain", e));
    }

    debug!(source = %source.name(), "Audio branch added");
    Ok(source)
}
