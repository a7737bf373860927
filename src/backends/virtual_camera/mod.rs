// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture devices
//!
//! Each virtual camera fills its outputs with a solid color. How it opens,
//! whether it accepts sessions and when it disconnects are scripted per camera,
//! and everything it is asked to do is recorded in [`VirtualStats`]. Used for
//! running without hardware and throughout the test suite.
//!
//! ```text
//! open() ──► device thread ──► Opened
//!                 │
//!                 ├── CreateSession / SetRepeating / Capture / CloseSession
//!                 │
//!                 └── frames at the requested rate ──► output surfaces
//! ```

use crate::backends::camera::{
    BackendResult, CameraBackendType, CameraDescriptor, CameraFacing, CaptureRequest, CaptureService,
    ColorProfile, DeviceId, FrameImage, OutputSurface, PlatformDevice, PlatformEvent,
    PlatformEventSender, PlatformSession, Resolution, SessionReply, ZoomRange,
};
use crate::constants::timing::{DEFAULT_FRAME_RATE, frame_interval};
use crate::errors::CameraError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How a virtual camera responds to `open`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenBehavior {
    Open,
    Fail,
    /// Open, then report a disconnect after the delay
    DisconnectAfter(Duration),
}

/// How a virtual camera responds to session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    Configure,
    Reject,
}

/// Script for one synthetic camera
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    pub descriptor: CameraDescriptor,
    pub color: [u8; 4],
    pub open: OpenBehavior,
    pub session: SessionBehavior,
    pub open_delay: Duration,
    pub configure_delay: Duration,
}

impl VirtualCamera {
    pub fn new(id: &str, facing: CameraFacing, color: [u8; 4]) -> Self {
        Self {
            descriptor: CameraDescriptor {
                id: DeviceId::new(id),
                name: format!("Virtual {} camera", facing),
                facing,
                zoom_range: ZoomRange::new(1.0, 8.0),
                resolutions: vec![
                    Resolution::new(1920, 1080),
                    Resolution::new(1280, 720),
                    Resolution::new(640, 480),
                ],
            },
            color,
            open: OpenBehavior::Open,
            session: SessionBehavior::Configure,
            open_delay: Duration::ZERO,
            configure_delay: Duration::from_millis(2),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.descriptor.id
    }

    pub fn with_zoom_range(mut self, range: ZoomRange) -> Self {
        self.descriptor.zoom_range = range;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.open = OpenBehavior::Fail;
        self
    }

    pub fn disconnecting_after(mut self, delay: Duration) -> Self {
        self.open = OpenBehavior::DisconnectAfter(delay);
        self
    }

    pub fn rejecting_sessions(mut self) -> Self {
        self.session = SessionBehavior::Reject;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_configure_delay(mut self, delay: Duration) -> Self {
        self.configure_delay = delay;
        self
    }
}

/// Phase of a session configuration on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurePhase {
    Begin,
    End,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureEvent {
    pub device: DeviceId,
    pub serial: u64,
    pub phase: ConfigurePhase,
}

#[derive(Default)]
struct StatsInner {
    opens: HashMap<DeviceId, u32>,
    closes: HashMap<DeviceId, u32>,
    sessions_created: u64,
    live_sessions: HashMap<DeviceId, u64>,
    configure_log: Vec<ConfigureEvent>,
    requests: HashMap<DeviceId, Vec<CaptureRequest>>,
    profiles: HashMap<DeviceId, Vec<ColorProfile>>,
    frames_delivered: u64,
}

/// What the virtual cameras were asked to do
#[derive(Default)]
pub struct VirtualStats {
    inner: Mutex<StatsInner>,
}

impl VirtualStats {
    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open_count(&self, id: &DeviceId) -> u32 {
        self.lock().opens.get(id).copied().unwrap_or(0)
    }

    pub fn close_count(&self, id: &DeviceId) -> u32 {
        self.lock().closes.get(id).copied().unwrap_or(0)
    }

    /// Devices opened and not yet closed
    pub fn open_devices(&self) -> usize {
        let inner = self.lock();
        inner
            .opens
            .iter()
            .filter(|(id, opens)| **opens > inner.closes.get(*id).copied().unwrap_or(0))
            .count()
    }

    pub fn sessions_created(&self) -> u64 {
        self.lock().sessions_created
    }

    /// Sessions configured on a device and not yet closed or superseded
    pub fn live_sessions(&self) -> usize {
        self.lock().live_sessions.len()
    }

    pub fn configure_log(&self) -> Vec<ConfigureEvent> {
        self.lock().configure_log.clone()
    }

    pub fn requests(&self, id: &DeviceId) -> Vec<CaptureRequest> {
        self.lock().requests.get(id).cloned().unwrap_or_default()
    }

    pub fn last_zoom(&self, id: &DeviceId) -> Option<f32> {
        self.lock()
            .requests
            .get(id)
            .and_then(|r| r.last())
            .map(|r| r.zoom_ratio)
    }

    pub fn session_profiles(&self, id: &DeviceId) -> Vec<ColorProfile> {
        self.lock().profiles.get(id).cloned().unwrap_or_default()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.lock().frames_delivered
    }

    fn record_open(&self, id: &DeviceId) {
        *self.lock().opens.entry(id.clone()).or_default() += 1;
    }

    fn record_close(&self, id: &DeviceId) {
        let mut inner = self.lock();
        *inner.closes.entry(id.clone()).or_default() += 1;
        if let Some(serial) = inner.live_sessions.remove(id) {
            inner.configure_log.push(ConfigureEvent {
                device: id.clone(),
                serial,
                phase: ConfigurePhase::Closed,
            });
        }
    }

    fn record_phase(&self, id: &DeviceId, serial: u64, phase: ConfigurePhase) {
        self.lock().configure_log.push(ConfigureEvent {
            device: id.clone(),
            serial,
            phase,
        });
    }

    fn record_session(&self, id: &DeviceId, serial: u64, profile: ColorProfile) {
        let mut inner = self.lock();
        inner.sessions_created += 1;
        if let Some(previous) = inner.live_sessions.insert(id.clone(), serial) {
            inner.configure_log.push(ConfigureEvent {
                device: id.clone(),
                serial: previous,
                phase: ConfigurePhase::Closed,
            });
        }
        inner.profiles.entry(id.clone()).or_default().push(profile);
    }

    fn record_session_closed(&self, id: &DeviceId, serial: u64) {
        let mut inner = self.lock();
        if inner.live_sessions.get(id) == Some(&serial) {
            inner.live_sessions.remove(id);
            inner.configure_log.push(ConfigureEvent {
                device: id.clone(),
                serial,
                phase: ConfigurePhase::Closed,
            });
        }
    }

    fn record_request(&self, id: &DeviceId, request: CaptureRequest) {
        self.lock()
            .requests
            .entry(id.clone())
            .or_default()
            .push(request);
    }

    fn record_frames(&self, count: u64) {
        self.lock().frames_delivered += count;
    }
}

/// Capture service backed by scripted synthetic cameras
pub struct VirtualCaptureService {
    cameras: Vec<VirtualCamera>,
    stats: Arc<VirtualStats>,
}

impl VirtualCaptureService {
    pub fn new(cameras: Vec<VirtualCamera>) -> Self {
        Self {
            cameras,
            stats: Arc::new(VirtualStats::default()),
        }
    }

    /// A teal front camera and an orange back camera
    pub fn default_pair() -> Self {
        Self::new(vec![
            VirtualCamera::new("virtual-front", CameraFacing::Front, [0, 160, 160, 255]),
            VirtualCamera::new("virtual-back", CameraFacing::Back, [240, 120, 0, 255]),
        ])
    }

    pub fn stats(&self) -> Arc<VirtualStats> {
        Arc::clone(&self.stats)
    }
}

impl CaptureService for VirtualCaptureService {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }

    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDescriptor>> {
        Ok(self.cameras.iter().map(|c| c.descriptor.clone()).collect())
    }

    fn open(&self, id: &DeviceId, events: PlatformEventSender) {
        let Some(camera) = self.cameras.iter().find(|c| c.id() == id).cloned() else {
            let _ = events.send(PlatformEvent::Error(CameraError::DeviceNotFound(
                id.to_string(),
            )));
            return;
        };
        let stats = Arc::clone(&self.stats);

        let spawned = std::thread::Builder::new()
            .name(format!("virtual-{}", id))
            .spawn({
                let events = events.clone();
                move || run_device(camera, stats, events)
            });

        if let Err(e) = spawned {
            let _ = events.send(PlatformEvent::Error(CameraError::DeviceOpenFailure(
                e.to_string(),
            )));
        }
    }
}

enum Command {
    CreateSession {
        serial: u64,
        outputs: Vec<OutputSurface>,
        profile: ColorProfile,
        session_commands: mpsc::Sender<Command>,
        reply: oneshot::Sender<BackendResult<Box<dyn PlatformSession>>>,
    },
    SetRepeating {
        serial: u64,
        request: CaptureRequest,
    },
    Capture {
        serial: u64,
        request: CaptureRequest,
    },
    CloseSession {
        serial: u64,
    },
    Close,
}

struct ActiveSession {
    serial: u64,
    outputs: Vec<OutputSurface>,
    repeating: Option<CaptureRequest>,
    next_frame_at: Instant,
}

struct FrameSource {
    color: [u8; 4],
    cache: HashMap<Resolution, Arc<[u8]>>,
    sequence: u64,
}

impl FrameSource {
    fn frame(&mut self, size: Resolution) -> FrameImage {
        let color = self.color;
        let data = self.cache.entry(size).or_insert_with(|| {
            let solid = FrameImage::solid(size.width, size.height, color);
            solid.data
        });
        self.sequence += 1;
        FrameImage::new(size.width, size.height, Arc::clone(data), self.sequence)
    }

    fn deliver(&mut self, outputs: &[OutputSurface]) -> u64 {
        let mut delivered = 0;
        for output in outputs.iter().filter(|o| !o.is_released()) {
            let frame = self.frame(output.buffer_size());
            output.queue_frame(frame);
            delivered += 1;
        }
        delivered
    }
}

/// Device thread: opens, serves commands in order and paces frames
fn run_device(camera: VirtualCamera, stats: Arc<VirtualStats>, events: PlatformEventSender) {
    let id = camera.id().clone();
    if !camera.open_delay.is_zero() {
        std::thread::sleep(camera.open_delay);
    }

    let disconnect_at = match camera.open {
        OpenBehavior::Fail => {
            info!(device = %id, "Virtual camera refusing to open");
            let _ = events.send(PlatformEvent::Error(CameraError::DeviceOpenFailure(format!(
                "{} refused to open",
                id
            ))));
            return;
        }
        OpenBehavior::Open => None,
        OpenBehavior::DisconnectAfter(delay) => Some(Instant::now() + delay),
    };

    let (tx, rx) = mpsc::channel();
    let device = Arc::new(VirtualDevice {
        id: id.clone(),
        commands: tx,
        serials: AtomicU64::new(0),
    });
    stats.record_open(&id);
    if events.send(PlatformEvent::Opened(device)).is_err() {
        stats.record_close(&id);
        return;
    }

    let mut source = FrameSource {
        color: camera.color,
        cache: HashMap::new(),
        sequence: 0,
    };
    let mut session: Option<ActiveSession> = None;

    loop {
        let now = Instant::now();
        let next_frame = session
            .as_ref()
            .filter(|s| s.repeating.is_some())
            .map(|s| s.next_frame_at);
        let deadline = [next_frame, disconnect_at].into_iter().flatten().min();

        let command = match deadline {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(now)),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::CreateSession {
                serial,
                outputs,
                profile,
                session_commands,
                reply,
            }) => {
                stats.record_phase(&id, serial, ConfigurePhase::Begin);
                if let Some(previous) = session.take() {
                    stats.record_session_closed(&id, previous.serial);
                }
                if !camera.configure_delay.is_zero() {
                    std::thread::sleep(camera.configure_delay);
                }
                let result = match camera.session {
                    SessionBehavior::Reject => {
                        Err(CameraError::SessionConfigurationFailure(format!(
                            "{} rejected {} outputs",
                            id,
                            outputs.len()
                        )))
                    }
                    SessionBehavior::Configure if outputs.is_empty() => Err(
                        CameraError::SessionConfigurationFailure("no output surfaces".to_string()),
                    ),
                    SessionBehavior::Configure => {
                        stats.record_session(&id, serial, profile);
                        session = Some(ActiveSession {
                            serial,
                            outputs,
                            repeating: None,
                            next_frame_at: Instant::now(),
                        });
                        Ok(Box::new(VirtualSession {
                            serial,
                            commands: Mutex::new(session_commands),
                        }) as Box<dyn PlatformSession>)
                    }
                };
                stats.record_phase(&id, serial, ConfigurePhase::End);
                let _ = reply.send(result);
            }
            Ok(Command::SetRepeating { serial, request }) => {
                if let Some(active) = session.as_mut().filter(|s| s.serial == serial) {
                    stats.record_request(&id, request);
                    active.repeating = Some(request);
                    active.next_frame_at = Instant::now();
                }
            }
            Ok(Command::Capture { serial, request }) => {
                if let Some(active) = session.as_ref().filter(|s| s.serial == serial) {
                    stats.record_request(&id, request);
                    stats.record_frames(source.deliver(&active.outputs));
                }
            }
            Ok(Command::CloseSession { serial }) => {
                if session.as_ref().is_some_and(|s| s.serial == serial) {
                    session = None;
                    stats.record_session_closed(&id, serial);
                }
            }
            Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(active) = session.as_mut() {
            if let Some(request) = active.repeating {
                if Instant::now() >= active.next_frame_at {
                    stats.record_frames(source.deliver(&active.outputs));
                    let fps = request.target_fps.unwrap_or(DEFAULT_FRAME_RATE);
                    active.next_frame_at += frame_interval(fps);
                    if active.next_frame_at < Instant::now() {
                        active.next_frame_at = Instant::now();
                    }
                }
            }
        }

        if disconnect_at.is_some_and(|at| Instant::now() >= at) {
            warn!(device = %id, "Virtual camera disconnecting");
            let _ = events.send(PlatformEvent::Disconnected);
            break;
        }
    }

    debug!(device = %id, "Virtual camera thread exiting");
    stats.record_close(&id);
}

struct VirtualDevice {
    id: DeviceId,
    commands: mpsc::Sender<Command>,
    serials: AtomicU64,
}

impl PlatformDevice for VirtualDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn create_session(&self, outputs: Vec<OutputSurface>, profile: ColorProfile) -> SessionReply {
        let (reply, rx) = oneshot::channel();
        let serial = self.serials.fetch_add(1, Ordering::SeqCst) + 1;
        let command = Command::CreateSession {
            serial,
            outputs,
            profile,
            session_commands: self.commands.clone(),
            reply,
        };
        if let Err(mpsc::SendError(Command::CreateSession { reply, .. })) = self.commands.send(command)
        {
            let _ = reply.send(Err(CameraError::DeviceAccessFailure(format!(
                "{} is closed",
                self.id
            ))));
        }
        rx
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct VirtualSession {
    serial: u64,
    commands: Mutex<mpsc::Sender<Command>>,
}

impl VirtualSession {
    fn send(&self, command: Command) -> BackendResult<()> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(command)
            .map_err(|_| CameraError::DeviceAccessFailure("virtual camera closed".to_string()))
    }
}

impl PlatformSession for VirtualSession {
    fn set_repeating(&self, request: &CaptureRequest) -> BackendResult<()> {
        self.send(Command::SetRepeating {
            serial: self.serial,
            request: *request,
        })
    }

    fn capture(&self, request: &CaptureRequest) -> BackendResult<()> {
        self.send(Command::Capture {
            serial: self.serial,
            request: *request,
        })
    }

    fn close(&self) {
        let _ = self.send(Command::CloseSession {
            serial: self.serial,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{FrameConsumer, RequestTemplate};
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Default)]
    struct CountingSurface {
        frames: Mutex<Vec<FrameImage>>,
    }

    impl FrameConsumer for CountingSurface {
        fn buffer_size(&self) -> Resolution {
            Resolution::new(8, 4)
        }

        fn queue_frame(&self, frame: FrameImage) {
            self.frames.lock().unwrap().push(frame);
        }

        fn is_released(&self) -> bool {
            false
        }
    }

    async fn open(service: &VirtualCaptureService, id: &str) -> PlatformEvent {
        let (tx, mut rx) = unbounded_channel();
        service.open(&DeviceId::new(id), tx);
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let service = VirtualCaptureService::new(vec![
            VirtualCamera::new("cam", CameraFacing::Front, [0, 0, 0, 255]).failing_open(),
        ]);
        match open(&service, "cam").await {
            PlatformEvent::Error(CameraError::DeviceOpenFailure(_)) => {}
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(service.stats().open_count(&DeviceId::new("cam")), 0);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let service = VirtualCaptureService::default_pair();
        assert!(matches!(
            open(&service, "nope").await,
            PlatformEvent::Error(CameraError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_delivers_solid_frames() {
        let service = VirtualCaptureService::new(vec![VirtualCamera::new(
            "cam",
            CameraFacing::Back,
            [10, 20, 30, 255],
        )]);
        let PlatformEvent::Opened(device) = open(&service, "cam").await else {
            panic!("camera did not open");
        };

        let surface = Arc::new(CountingSurface::default());
        let session = device
            .create_session(vec![surface.clone() as OutputSurface], ColorProfile::Standard)
            .await
            .unwrap()
            .unwrap();
        session
            .set_repeating(&CaptureRequest::repeating(RequestTemplate::Preview, 2.0, 60))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close();
        device.close();

        let frames = surface.frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert_eq!(frames[0].width, 8);
        assert_eq!(&frames[0].data[..4], &[10, 20, 30, 255]);

        let stats = service.stats();
        let id = DeviceId::new("cam");
        assert_eq!(stats.sessions_created(), 1);
        assert_eq!(stats.last_zoom(&id), Some(2.0));
    }

    #[tokio::test]
    async fn test_rejected_session() {
        let service = VirtualCaptureService::new(vec![
            VirtualCamera::new("cam", CameraFacing::Front, [0, 0, 0, 255]).rejecting_sessions(),
        ]);
        let PlatformEvent::Opened(device) = open(&service, "cam").await else {
            panic!("camera did not open");
        };
        let surface: OutputSurface = Arc::new(CountingSurface::default());
        let result = device
            .create_session(vec![surface], ColorProfile::Standard)
            .await
            .unwrap();
        assert!(matches!(
            result.err(),
            Some(CameraError::SessionConfigurationFailure(_))
        ));
        assert_eq!(service.stats().live_sessions(), 0);
        device.close();
    }

    #[tokio::test]
    async fn test_scripted_disconnect() {
        let service = VirtualCaptureService::new(vec![
            VirtualCamera::new("cam", CameraFacing::Front, [0, 0, 0, 255])
                .disconnecting_after(Duration::from_millis(20)),
        ]);
        let (tx, mut rx) = unbounded_channel();
        service.open(&DeviceId::new("cam"), tx);
        assert!(matches!(rx.recv().await, Some(PlatformEvent::Opened(_))));
        assert!(matches!(rx.recv().await, Some(PlatformEvent::Disconnected)));
    }
}
