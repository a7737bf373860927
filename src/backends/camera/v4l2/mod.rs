// SPDX-License-Identifier: GPL-3.0-only

//! Video4Linux2 capture backend
//!
//! Each capture node is one device. Facing comes from configuration; without
//! it the first capture node faces front and the rest face back. A session
//! streams YUYV from the node on its own capture thread and hands RGBA frames
//! to every output surface.

pub mod controls;
pub mod convert;

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::*;
use super::{CaptureService, PlatformDevice, PlatformEvent, PlatformEventSender, PlatformSession, SessionReply};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::CameraError;
use controls::ZoomMapping;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Consecutive dequeue failures tolerated before the device is reported broken
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Mapped buffers live as long as the stream's own handle
type MappedStream = Stream<'static>;

/// V4L2 capture service
pub struct V4l2CaptureService {
    front: Option<DeviceId>,
    back: Option<DeviceId>,
}

impl V4l2CaptureService {
    pub fn new(front: Option<String>, back: Option<String>) -> Self {
        Self {
            front: front.map(DeviceId),
            back: back.map(DeviceId),
        }
    }

    fn capture_nodes() -> Vec<PathBuf> {
        let mut nodes: Vec<PathBuf> = std::fs::read_dir("/dev")
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        nodes.sort();
        nodes
    }

    fn facing_for(&self, id: &DeviceId, index: usize) -> CameraFacing {
        if self.front.as_ref() == Some(id) {
            CameraFacing::Front
        } else if self.back.as_ref() == Some(id) {
            CameraFacing::Back
        } else if index == 0 && self.front.is_none() {
            CameraFacing::Front
        } else {
            CameraFacing::Back
        }
    }
}

fn supported_resolutions(dev: &Device) -> Vec<Resolution> {
    let mut resolutions = Vec::new();
    if let Ok(sizes) = dev.enum_framesizes(FourCC::new(b"YUYV")) {
        for size in sizes {
            match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                    resolutions.push(Resolution::new(discrete.width, discrete.height));
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                    for (w, h) in [(1920, 1080), (1280, 720), (640, 480)] {
                        if (step.min_width..=step.max_width).contains(&w)
                            && (step.min_height..=step.max_height).contains(&h)
                        {
                            resolutions.push(Resolution::new(w, h));
                        }
                    }
                }
            }
        }
    }
    resolutions.sort_by_key(|r| std::cmp::Reverse(r.pixels()));
    resolutions.dedup();
    resolutions
}

impl CaptureService for V4l2CaptureService {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }

    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDescriptor>> {
        let mut cameras = Vec::new();

        for path in Self::capture_nodes() {
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }

            let id = DeviceId(path.to_string_lossy().to_string());
            let facing = self.facing_for(&id, cameras.len());
            let zoom = ZoomMapping::probe(id.as_str());
            debug!(device = %id, card = %caps.card, %facing, "Found V4L2 capture node");

            cameras.push(CameraDescriptor {
                name: caps.card.clone(),
                facing,
                zoom_range: zoom.zoom_range(),
                resolutions: supported_resolutions(&dev),
                id,
            });
        }

        info!(count = cameras.len(), "Enumerated V4L2 cameras");
        Ok(cameras)
    }

    fn open(&self, id: &DeviceId, events: PlatformEventSender) {
        let id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("v4l2-open-{}", id))
            .spawn({
                let events = events.clone();
                move || {
                    let event = match Device::with_path(id.as_str()) {
                        Ok(_) => {
                            let zoom = ZoomMapping::probe(id.as_str());
                            PlatformEvent::Opened(Arc::new(V4l2Device {
                                shared: Arc::new(V4l2Shared {
                                    id,
                                    zoom,
                                    events: events.clone(),
                                    active: Mutex::new(None),
                                    next_serial: AtomicU64::new(0),
                                    closed: AtomicBool::new(false),
                                }),
                            }))
                        }
                        Err(e) => PlatformEvent::Error(CameraError::DeviceOpenFailure(format!(
                            "{}: {}",
                            id, e
                        ))),
                    };
                    let _ = events.send(event);
                }
            });

        if let Err(e) = spawned {
            let _ = events.send(PlatformEvent::Error(CameraError::DeviceOpenFailure(
                e.to_string(),
            )));
        }
    }
}

struct ActiveSession {
    serial: u64,
    outputs: Arc<Vec<OutputSurface>>,
    capture: Option<CaptureLoopController>,
}

struct V4l2Shared {
    id: DeviceId,
    zoom: ZoomMapping,
    events: PlatformEventSender,
    active: Mutex<Option<ActiveSession>>,
    next_serial: AtomicU64,
    closed: AtomicBool,
}

impl V4l2Shared {
    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop_session(&self, serial: Option<u64>) {
        let taken = {
            let mut active = self.lock_active();
            match (active.as_ref(), serial) {
                (Some(current), Some(serial)) if current.serial != serial => None,
                _ => active.take(),
            }
        };
        if let Some(mut session) = taken {
            debug!(device = %self.id, serial = session.serial, "Stopping V4L2 stream");
            if let Some(capture) = session.capture.as_mut() {
                capture.stop();
            }
        }
    }

    fn start_streaming(&self, serial: u64) -> BackendResult<()> {
        let mut active = self.lock_active();
        let Some(session) = active.as_mut().filter(|s| s.serial == serial) else {
            return Err(CameraError::DeviceAccessFailure(format!(
                "session {} on {} was superseded",
                serial, self.id
            )));
        };
        if session.capture.as_ref().is_some_and(|c| c.is_running()) {
            return Ok(());
        }

        let size = session
            .outputs
            .iter()
            .map(|o| o.buffer_size())
            .max_by_key(|r| r.pixels())
            .unwrap_or(Resolution::new(640, 480));
        let path = self.id.as_str().to_string();
        let outputs = Arc::clone(&session.outputs);
        let events = self.events.clone();
        let error_events = self.events.clone();

        let controller = CaptureLoopController::start_with_init(
            self.id.as_str(),
            move || open_stream(&path, size),
            move |state| state.deliver(&outputs, &events),
            move |e| {
                let _ = error_events.send(PlatformEvent::Error(CameraError::DeviceAccessFailure(e)));
            },
        )
        .map_err(|e| CameraError::DeviceAccessFailure(e.to_string()))?;

        session.capture = Some(controller);
        Ok(())
    }
}

struct V4l2Device {
    shared: Arc<V4l2Shared>,
}

impl PlatformDevice for V4l2Device {
    fn id(&self) -> &DeviceId {
        &self.shared.id
    }

    fn create_session(&self, outputs: Vec<OutputSurface>, profile: ColorProfile) -> SessionReply {
        let (tx, rx) = oneshot::channel();
        let shared = &self.shared;

        if shared.closed.load(Ordering::SeqCst) {
            let _ = tx.send(Err(CameraError::DeviceAccessFailure(format!(
                "{} is closed",
                shared.id
            ))));
            return rx;
        }
        if outputs.is_empty() {
            let _ = tx.send(Err(CameraError::SessionConfigurationFailure(
                "no output surfaces".to_string(),
            )));
            return rx;
        }
        if profile == ColorProfile::ExtendedRange {
            debug!(device = %shared.id, "V4L2 delivers 8-bit frames; extended range applies downstream only");
        }

        shared.stop_session(None);
        let serial = shared.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        *shared.lock_active() = Some(ActiveSession {
            serial,
            outputs: Arc::new(outputs),
            capture: None,
        });

        let _ = tx.send(Ok(Box::new(V4l2Session {
            shared: Arc::clone(shared),
            serial,
        }) as Box<dyn PlatformSession>));
        rx
    }

    fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!(device = %self.shared.id, "Closing V4L2 device");
            self.shared.stop_session(None);
        }
    }
}

struct V4l2Session {
    shared: Arc<V4l2Shared>,
    serial: u64,
}

impl PlatformSession for V4l2Session {
    fn set_repeating(&self, request: &CaptureRequest) -> BackendResult<()> {
        if let Err(e) = self.shared.zoom.apply(self.shared.id.as_str(), request.zoom_ratio) {
            warn!(device = %self.shared.id, error = %e, "Zoom not applied");
        }
        self.shared.start_streaming(self.serial)
    }

    fn capture(&self, request: &CaptureRequest) -> BackendResult<()> {
        if let Err(e) = self.shared.zoom.apply(self.shared.id.as_str(), request.zoom_ratio) {
            warn!(device = %self.shared.id, error = %e, "Zoom not applied");
        }
        // Capture-only sessions have no standing request, so the one-shot
        // request starts the stream that delivers its frame
        self.shared.start_streaming(self.serial)
    }

    fn close(&self) {
        self.shared.stop_session(Some(self.serial));
    }
}

struct StreamState {
    _device: Device,
    stream: MappedStream,
    width: u32,
    height: u32,
    fourcc: FourCC,
    sequence: u64,
    consecutive_errors: u32,
}

fn open_stream(path: &str, size: Resolution) -> Result<StreamState, String> {
    let dev = Device::with_path(path).map_err(|e| format!("Failed to open device: {}", e))?;
    let requested = Format::new(size.width, size.height, FourCC::new(b"YUYV"));
    let actual = dev
        .set_format(&requested)
        .map_err(|e| format!("Failed to set format: {}", e))?;

    info!(
        device = path,
        width = actual.width,
        height = actual.height,
        fourcc = ?actual.fourcc,
        "V4L2 capture format configured"
    );

    let stream: MappedStream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
        .map_err(|e| format!("Failed to create stream: {}", e))?;

    Ok(StreamState {
        _device: dev,
        stream,
        width: actual.width,
        height: actual.height,
        fourcc: actual.fourcc,
        sequence: 0,
        consecutive_errors: 0,
    })
}

impl StreamState {
    fn deliver(&mut self, outputs: &[OutputSurface], events: &PlatformEventSender) -> LoopAction {
        if outputs.iter().all(|o| o.is_released()) {
            return LoopAction::Stop;
        }

        let (buf, _meta) = match self.stream.next() {
            Ok(frame) => frame,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                let _ = events.send(PlatformEvent::Disconnected);
                return LoopAction::Stop;
            }
            Err(e) => {
                self.consecutive_errors += 1;
                warn!(error = %e, errors = self.consecutive_errors, "Failed to dequeue frame");
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    let _ = events.send(PlatformEvent::Error(CameraError::DeviceAccessFailure(
                        e.to_string(),
                    )));
                    return LoopAction::Stop;
                }
                return LoopAction::Continue;
            }
        };
        self.consecutive_errors = 0;

        let rgba = if self.fourcc == FourCC::new(b"YUYV") {
            convert::yuyv_to_rgba(buf, self.width, self.height)
        } else if self.fourcc == FourCC::new(b"RGB3") {
            convert::rgb_to_rgba(buf)
        } else {
            warn!(fourcc = ?self.fourcc, "Unsupported capture format");
            return LoopAction::Stop;
        };

        self.sequence += 1;
        if self.sequence % FRAME_LOG_INTERVAL == 0 {
            debug!(sequence = self.sequence, "V4L2 frames delivered");
        }

        let frame = FrameImage::new(self.width, self.height, Arc::from(rgba), self.sequence);
        for output in outputs.iter().filter(|o| !o.is_released()) {
            output.queue_frame(frame.clone());
        }
        LoopAction::Continue
    }
}
