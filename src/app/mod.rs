// SPDX-License-Identifier: GPL-3.0-only

//! Capture orchestration
//!
//! The [`Orchestrator`] ties capture mode, camera settings, the output target
//! and device state together and (re)builds the pipeline whenever one of them
//! changes:
//!
//! ```text
//!  mode / settings / target / user action
//!                  │
//!                  ▼
//!   cancel + join active task  ──►  build Pipeline  ──►  start task
//!                                   (context, textures,    (render loop,
//!                                    front + back session)  still, record)
//! ```
//!
//! Every command takes the control lock for its whole duration, so triggers
//! are applied one at a time and at most one task ever drives a pipeline.
//! Zoom and compositor layout are published through observables and never
//! cause a rebuild.

pub mod compositor;
pub mod devices;
pub mod observable;
pub mod pipeline;
pub mod state;
pub mod surface_texture;
pub mod task;
pub mod zoom;

pub use compositor::CompositeLayout;
pub use state::{CaptureMode, State};
pub use zoom::ZoomState;

use crate::backends::camera::{
    CameraFacing, CaptureDeviceSessionManager, CaptureRequest, CaptureService, ColorProfile,
    DeviceId, FrameImage, RequestTemplate, select_pair,
};
use crate::config::{CameraSettings, Config};
use crate::constants::render::MAX_STILL_IMAGES;
use crate::constants::timing::{FRAME_WAIT_TIMEOUT, STILL_READBACK_TIMEOUT, frame_interval};
use crate::errors::{AppError, AppResult, CameraError, ErrorEvent, PhotoError, RecordingError};
use crate::gpu::{ContextRegistry, OutputTarget, RendererKind};
use crate::pipelines::photo::{EncodingFormat, ImageReader, ImageSink, PhotoEncoder};
use crate::pipelines::video::{EncoderConfig, EncoderFactory, RecordedVideo, VideoSink};
use crate::storage::MediaStore;
use compositor::FrameCompositor;
use devices::{DeviceLoss, DevicePair, open_pair};
use image::RgbaImage;
use pipeline::{Pipeline, PipelineSpec, SessionPlan, SurfacePool};
use state::Signals;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use task::{CancelSignal, TaskKind, TaskSlot};
use tokio::sync::{Mutex, MutexGuard, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Startup choices that stay fixed for the orchestrator's lifetime
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub front_device: Option<DeviceId>,
    pub back_device: Option<DeviceId>,
    pub renderer: RendererKind,
    pub photo_format: EncodingFormat,
    pub jpeg_quality: u8,
    pub record_audio: bool,
    pub mode: CaptureMode,
    pub layout: CompositeLayout,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorOptions {
    fn from(config: &Config) -> Self {
        Self {
            front_device: config.front_device.clone().map(DeviceId::new),
            back_device: config.back_device.clone().map(DeviceId::new),
            renderer: config.renderer,
            photo_format: config.photo_format,
            jpeg_quality: config.jpeg_quality,
            record_audio: config.record_audio,
            mode: CaptureMode::default(),
            layout: CompositeLayout {
                flip: config.flip,
                landscape: false,
                overlay_scale: config.overlay_scale,
                overlay_offset: config.overlay_offset,
            },
        }
    }
}

/// The platform services the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn CaptureService>,
    pub store: Arc<dyn MediaStore>,
    pub encoders: Arc<dyn EncoderFactory>,
}

struct Control {
    permission: bool,
    settings: CameraSettings,
    target: Option<OutputTarget>,
    devices: Option<DevicePair>,
    epoch: u64,
    task: TaskSlot,
    surfaces: SurfacePool,
    recording: Option<VideoSink>,
    destroyed: bool,
}

struct Inner {
    options: OrchestratorOptions,
    manager: CaptureDeviceSessionManager,
    store: Arc<dyn MediaStore>,
    encoders: Arc<dyn EncoderFactory>,
    registry: Arc<ContextRegistry>,
    signals: Arc<Signals>,
    losses: mpsc::UnboundedSender<DeviceLoss>,
    control: Mutex<Control>,
}

/// Dual-camera capture state machine
///
/// Cheap to clone; all clones drive the same cameras. Must be created inside
/// a tokio runtime. Camera access stays off until
/// [`set_permission(true)`](Self::set_permission).
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        options: OrchestratorOptions,
        settings: CameraSettings,
        collaborators: Collaborators,
    ) -> Self {
        let (losses, loss_rx) = mpsc::unbounded_channel();
        let signals = Arc::new(Signals::new(options.mode, options.layout));
        let inner = Arc::new(Inner {
            manager: CaptureDeviceSessionManager::new(collaborators.capture),
            store: collaborators.store,
            encoders: collaborators.encoders,
            registry: Arc::new(ContextRegistry::default()),
            signals,
            losses,
            control: Mutex::new(Control {
                permission: false,
                settings,
                target: None,
                devices: None,
                epoch: 0,
                task: TaskSlot::new(),
                surfaces: SurfacePool::default(),
                recording: None,
                destroyed: false,
            }),
            options,
        });

        tokio::spawn(forward_device_losses(Arc::downgrade(&inner), loss_rx));
        info!(
            backend = ?inner.manager.backend_type(),
            renderer = ?inner.options.renderer,
            "Orchestrator created"
        );
        Self { inner }
    }

    // Observables

    pub fn state(&self) -> watch::Receiver<State> {
        self.inner.signals.state.subscribe()
    }

    pub fn current_state(&self) -> State {
        self.inner.signals.state.get()
    }

    pub fn mode(&self) -> watch::Receiver<CaptureMode> {
        self.inner.signals.mode.subscribe()
    }

    pub fn current_mode(&self) -> CaptureMode {
        self.inner.signals.mode.get()
    }

    pub fn recording(&self) -> watch::Receiver<bool> {
        self.inner.signals.recording.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.signals.recording.get()
    }

    pub fn zoom(&self) -> watch::Receiver<ZoomState> {
        self.inner.signals.zoom.subscribe()
    }

    pub fn layout(&self) -> watch::Receiver<CompositeLayout> {
        self.inner.signals.layout.subscribe()
    }

    /// Latest unacknowledged error
    pub fn errors(&self) -> watch::Receiver<Option<ErrorEvent>> {
        self.inner.signals.errors.subscribe()
    }

    pub fn current_error(&self) -> Option<ErrorEvent> {
        self.inner.signals.errors.current()
    }

    /// Error events emitted so far, acknowledged or not
    pub fn errors_emitted(&self) -> u64 {
        self.inner.signals.errors.emitted()
    }

    pub fn dismiss_error(&self) {
        self.inner.signals.errors.dismiss();
    }

    // Diagnostics

    pub fn live_rendering_contexts(&self) -> usize {
        self.inner.registry.live()
    }

    pub fn rendering_contexts_created(&self) -> u64 {
        self.inner.registry.created()
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.manager.live_session_count()
    }

    pub async fn detached_surfaces(&self) -> usize {
        self.inner.control.lock().await.surfaces.detached()
    }

    pub fn enumerate_devices(&self) -> AppResult<Vec<crate::backends::camera::CameraDescriptor>> {
        Ok(self.inner.manager.enumerate_devices()?)
    }

    // Triggers

    /// Grant or revoke camera access
    ///
    /// Revoking stops the active task and closes both devices.
    pub async fn set_permission(&self, granted: bool) -> AppResult<()> {
        let mut ctl = self.lock_live().await?;
        if ctl.permission == granted {
            return Ok(());
        }
        info!(granted, "Camera permission changed");
        ctl.permission = granted;
        if granted {
            self.resume_preview(&mut ctl).await;
        } else {
            self.interrupt(&mut ctl).await;
            self.close_devices(&mut ctl).await;
            self.inner.signals.state.set(State::Idle);
        }
        Ok(())
    }

    /// Apply new camera settings; rebuilds the running pipeline
    pub async fn update_settings(&self, settings: CameraSettings) -> AppResult<()> {
        let mut ctl = self.lock_live().await?;
        if ctl.settings == settings {
            return Ok(());
        }
        info!(output = %settings.output_resolution(), "Camera settings changed");
        self.interrupt(&mut ctl).await;
        ctl.settings = settings;
        self.resume_preview(&mut ctl).await;
        Ok(())
    }

    /// Switch between picture and video mode, keeping the devices open
    pub async fn switch_mode(&self, mode: CaptureMode) -> AppResult<()> {
        let mut ctl = self.lock_live().await?;
        if self.current_mode() == mode {
            return Ok(());
        }
        info!(%mode, "Switching capture mode");
        self.interrupt(&mut ctl).await;
        self.inner.signals.mode.set(mode);
        self.resume_preview(&mut ctl).await;
        Ok(())
    }

    /// Supply the preview surface, or withdraw it with `None`
    pub async fn set_output_target(&self, target: Option<OutputTarget>) -> AppResult<()> {
        let mut ctl = self.lock_live().await?;
        if ctl.target == target {
            return Ok(());
        }
        match &target {
            Some(target) => info!(target = target.label(), size = %target.size(), "Output target available"),
            None => info!("Output target withdrawn"),
        }
        self.interrupt(&mut ctl).await;
        if target.is_none() {
            ctl.surfaces.release(TaskKind::Preview);
        }
        ctl.target = target;
        self.resume_preview(&mut ctl).await;
        Ok(())
    }

    /// Composite one still from fresh frames of both cameras and persist it
    ///
    /// Resolves once the image has been written. The preview, if any, is
    /// rebuilt afterwards.
    pub async fn take_picture(&self) -> AppResult<PathBuf> {
        let mut ctl = self.lock_live().await?;
        if self.current_mode() != CaptureMode::Picture {
            return Err(PhotoError::NotInPictureMode.into());
        }
        self.interrupt(&mut ctl).await;

        let result = self.capture_still(&mut ctl).await;
        ctl.surfaces.release(TaskKind::StillCapture);
        match &result {
            Ok(path) => {
                info!(path = %path.display(), "Picture taken");
                self.resume_preview(&mut ctl).await;
            }
            Err(e) => self.recover(&mut ctl, e).await,
        }
        result
    }

    /// Start encoding composited frames
    ///
    /// Both devices must open and both sessions must configure before the
    /// encoder is started.
    pub async fn start_recording(&self) -> AppResult<()> {
        let mut ctl = self.lock_live().await?;
        if self.current_mode() != CaptureMode::Video {
            return Err(RecordingError::NotInVideoMode.into());
        }
        if ctl.recording.is_some() {
            return Err(RecordingError::AlreadyRecording.into());
        }
        self.interrupt(&mut ctl).await;

        match self.begin_recording(&mut ctl).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.recover(&mut ctl, &e).await;
                Err(e)
            }
        }
    }

    /// Stop recording and hand the finished file to storage
    ///
    /// Resolves after the encoder and muxer are fully released and the file
    /// has been persisted.
    ///
    /// The stop sequence runs on a task of its own, so a caller that stops
    /// waiting still leaves the recording flag, the state and the preview
    /// consistent.
    pub async fn stop_recording(&self) -> AppResult<RecordedVideo> {
        let this = self.clone();
        match tokio::spawn(async move { this.stop_recording_now().await }).await {
            Ok(result) => result,
            Err(e) => Err(RecordingError::EncoderOrMuxerFailure(format!(
                "stop task failed: {}",
                e
            ))
            .into()),
        }
    }

    async fn stop_recording_now(&self) -> AppResult<RecordedVideo> {
        let mut ctl = self.lock_live().await?;
        if ctl.recording.is_none() {
            return Err(RecordingError::NotRecording.into());
        }
        ctl.task.cancel_and_join().await;
        let result = match ctl.recording.take() {
            Some(sink) => self.finalize_recording(sink).await,
            None => Err(RecordingError::NotRecording),
        };
        ctl.surfaces.release(TaskKind::Recording);
        self.resume_preview(&mut ctl).await;
        Ok(result?)
    }

    /// Set `facing`'s zoom, clamped to its range; returns the applied ratio
    ///
    /// Applied to the running sessions without a rebuild.
    pub fn update_zoom(&self, facing: CameraFacing, value: f32) -> f32 {
        let mut applied = value;
        self.inner.signals.zoom.update(|zoom| applied = zoom.set(facing, value));
        debug!(%facing, requested = value, applied, "Zoom updated");
        applied
    }

    /// Front camera as background when `true`
    pub fn set_flip(&self, flip: bool) {
        self.inner.signals.layout.update(|layout| layout.flip = flip);
    }

    pub fn set_landscape(&self, landscape: bool) {
        self.inner.signals.layout.update(|layout| layout.landscape = landscape);
    }

    /// Overlay scale and center offset, clamped to their limits
    pub fn set_overlay_transform(&self, scale: f32, dx: f32, dy: f32) {
        self.inner.signals.layout.update(|layout| {
            layout.overlay_scale = scale;
            layout.overlay_offset = (dx, dy);
            *layout = layout.clamped();
        });
    }

    /// Alpha-blended layer drawn over both cameras, `None` to remove it
    pub fn set_ui_overlay(&self, image: Option<RgbaImage>) {
        let image = image.map(|image| {
            let (width, height) = image.dimensions();
            FrameImage::new(width, height, Arc::from(image.into_raw()), 0)
        });
        self.inner
            .signals
            .ui_overlay
            .update(|overlay| *overlay = overlay.replaced(image));
    }

    /// Stop everything and release devices, contexts and surfaces
    ///
    /// Any recording in progress is finalized first. Later commands fail.
    pub async fn destroy(&self) {
        let mut ctl = self.inner.control.lock().await;
        if ctl.destroyed {
            return;
        }
        self.interrupt(&mut ctl).await;
        self.close_devices(&mut ctl).await;
        ctl.surfaces.release_all();
        ctl.target = None;
        ctl.destroyed = true;
        self.inner.signals.state.set(State::Idle);
        info!("Orchestrator destroyed");
    }

    // Internals

    async fn lock_live(&self) -> AppResult<MutexGuard<'_, Control>> {
        let ctl = self.inner.control.lock().await;
        if ctl.destroyed {
            return Err(AppError::Other("orchestrator has been destroyed".into()));
        }
        Ok(ctl)
    }

    /// Cancel and join the active task; a recording is finalized, not lost
    async fn interrupt(&self, ctl: &mut Control) {
        if let Some(kind) = ctl.task.cancel_and_join().await {
            debug!(?kind, "Active task stopped");
        }
        if let Some(sink) = ctl.recording.take() {
            warn!("Recording interrupted, finalizing");
            let _ = self.finalize_recording(sink).await;
            ctl.surfaces.release(TaskKind::Recording);
        }
    }

    /// Stop, release and persist on a task of its own
    ///
    /// The recording flag and any failure are published from that task, so
    /// dropping the caller leaves neither a half-written file nor a stale flag.
    async fn finalize_recording(&self, sink: VideoSink) -> Result<RecordedVideo, RecordingError> {
        let signals = Arc::clone(&self.inner.signals);
        let finalize = tokio::spawn(async move {
            let result = sink.stop().await;
            signals.recording.set(false);
            if let Err(e) = &result {
                signals.errors.emit(ErrorEvent::UnknownError, &e.to_string());
            }
            result
        });
        match finalize.await {
            Ok(result) => result,
            Err(e) => {
                self.inner.signals.recording.set(false);
                Err(RecordingError::EncoderOrMuxerFailure(format!(
                    "finalize task failed: {}",
                    e
                )))
            }
        }
    }

    async fn ensure_devices(&self, ctl: &mut Control) -> AppResult<()> {
        if ctl.devices.is_some() {
            return Ok(());
        }
        if !ctl.permission {
            return Err(CameraError::PermissionDenied.into());
        }

        let available = self.inner.manager.enumerate_devices()?;
        let (front, back) = select_pair(
            &available,
            self.inner.options.front_device.as_ref(),
            self.inner.options.back_device.as_ref(),
        )?;
        self.inner.signals.zoom.update(|zoom| {
            zoom.set_range(CameraFacing::Front, front.zoom_range);
            zoom.set_range(CameraFacing::Back, back.zoom_range);
        });

        ctl.epoch += 1;
        let pair = open_pair(
            &self.inner.manager,
            front,
            back,
            ctl.epoch,
            self.inner.losses.clone(),
        )
        .await?;
        ctl.devices = Some(pair);
        Ok(())
    }

    async fn close_devices(&self, ctl: &mut Control) {
        if let Some(devices) = ctl.devices.take() {
            devices.close().await;
        }
    }

    fn session_profile(&self, settings: &CameraSettings) -> ColorProfile {
        match self.current_mode() {
            CaptureMode::Picture => ColorProfile::Standard,
            CaptureMode::Video => settings.video_profile(),
        }
    }

    async fn build_pipeline(
        &self,
        ctl: &mut Control,
        spec: PipelineSpec,
        output: crate::backends::camera::Resolution,
    ) -> AppResult<Pipeline> {
        self.ensure_devices(ctl).await?;
        let sources = ctl.surfaces.sources(spec.sink, output);
        let devices = ctl
            .devices
            .as_ref()
            .ok_or(CameraError::DeviceDisconnected)?;
        Pipeline::build(
            spec,
            sources,
            devices,
            &self.inner.manager,
            &self.inner.registry,
            self.inner.signals.zoom.subscribe(),
        )
        .await
    }

    /// Start the preview if a target is available, otherwise go idle
    async fn resume_preview(&self, ctl: &mut Control) {
        let Some(target) = ctl.target.clone() else {
            self.inner.signals.state.set(State::Idle);
            return;
        };
        if !ctl.permission || ctl.destroyed {
            self.inner.signals.state.set(State::Idle);
            return;
        }

        let frame_rate = ctl.settings.effective_frame_rate();
        let spec = PipelineSpec {
            sink: TaskKind::Preview,
            renderer: self.inner.options.renderer,
            sessions: SessionPlan {
                profile: self.session_profile(&ctl.settings),
                repeating: Some(RequestTemplate::Preview),
                frame_rate,
            },
            target: target.clone(),
        };
        match self.build_pipeline(ctl, spec, target.size()).await {
            Ok(pipeline) => self.spawn_render_loop(ctl, TaskKind::Preview, pipeline, frame_rate),
            Err(e) => self.fail(ctl, &e).await,
        }
    }

    async fn capture_still(&self, ctl: &mut Control) -> AppResult<PathBuf> {
        let output = ctl.settings.output_resolution();
        let reader = ImageReader::new(output, MAX_STILL_IMAGES);
        let spec = PipelineSpec {
            sink: TaskKind::StillCapture,
            target: OutputTarget::new("still-image", output, Arc::new(reader.clone())),
            renderer: self.inner.options.renderer,
            sessions: SessionPlan {
                profile: ColorProfile::Standard,
                repeating: None,
                frame_rate: ctl.settings.effective_frame_rate(),
            },
        };
        let pipeline = self.build_pipeline(ctl, spec, output).await?;
        self.inner
            .signals
            .state
            .set(State::for_task(TaskKind::StillCapture));

        let signals = &self.inner.signals;
        let compositor = FrameCompositor::new(
            pipeline.sources.clone(),
            signals.layout.subscribe(),
            signals.ui_overlay.subscribe(),
        );
        let sink = ImageSink::new(
            PhotoEncoder::new(self.inner.options.photo_format, self.inner.options.jpeg_quality),
            Arc::clone(&self.inner.store),
            output,
        );
        let zoom = signals.zoom.get();

        let (done, result) = oneshot::channel();
        ctl.task.start(TaskKind::StillCapture, move |cancel: CancelSignal| async move {
            let outcome = tokio::select! {
                outcome = still_sequence(&pipeline, compositor, &reader, &sink, zoom) => outcome,
                () = cancel.cancelled() => Err(PhotoError::CaptureFailed("cancelled".into()).into()),
            };
            pipeline.teardown().await;
            let _ = done.send(outcome);
        });

        let outcome = result
            .await
            .unwrap_or_else(|_| Err(PhotoError::CaptureFailed("still task ended early".into()).into()));
        ctl.task.cancel_and_join().await;
        outcome
    }

    async fn begin_recording(&self, ctl: &mut Control) -> AppResult<()> {
        self.ensure_devices(ctl).await?;

        let config = EncoderConfig::from_settings(&ctl.settings, self.inner.options.record_audio);
        let preview = ctl.target.as_ref().map(|target| target.sink());
        let mut sink = VideoSink::create(
            self.inner.encoders.as_ref(),
            &config,
            Arc::clone(&self.inner.store),
            preview,
        )?;

        let spec = PipelineSpec {
            sink: TaskKind::Recording,
            target: OutputTarget::new("encoder-input", config.resolution, sink.frame_sink()),
            renderer: self.inner.options.renderer,
            sessions: SessionPlan {
                profile: self.session_profile(&ctl.settings),
                repeating: Some(RequestTemplate::Record),
                frame_rate: config.frame_rate,
            },
        };
        let pipeline = match self.build_pipeline(ctl, spec, config.resolution).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                sink.discard().await;
                return Err(e);
            }
        };
        if let Err(e) = sink.start().await {
            pipeline.teardown().await;
            sink.discard().await;
            return Err(e.into());
        }

        ctl.recording = Some(sink);
        self.inner.signals.recording.set(true);
        self.spawn_render_loop(ctl, TaskKind::Recording, pipeline, config.frame_rate);
        info!(
            resolution = %config.resolution,
            fps = config.frame_rate,
            codec = %config.codec,
            "Recording started"
        );
        Ok(())
    }

    fn spawn_render_loop(&self, ctl: &mut Control, kind: TaskKind, pipeline: Pipeline, frame_rate: u32) {
        // Published before the task runs so a loop that fails at once ends Idle
        self.inner.signals.state.set(State::for_task(kind));
        let signals = Arc::clone(&self.inner.signals);
        ctl.task.start(kind, move |cancel| {
            run_render_loop(signals, kind, pipeline, cancel, frame_rate)
        });
    }

    /// Report a failed command and restore a consistent state
    async fn recover(&self, ctl: &mut Control, error: &AppError) {
        match error {
            AppError::Camera(_) => self.fail(ctl, error).await,
            _ => {
                report(&self.inner.signals, error);
                self.resume_preview(ctl).await;
            }
        }
    }

    /// Report, close devices after a device failure, and go idle
    async fn fail(&self, ctl: &mut Control, error: &AppError) {
        report(&self.inner.signals, error);
        if matches!(error, AppError::Camera(_)) {
            self.close_devices(ctl).await;
        }
        self.inner.signals.state.set(State::Idle);
    }

    async fn handle_device_loss(&self, loss: DeviceLoss) {
        let mut ctl = self.inner.control.lock().await;
        if ctl.destroyed || ctl.devices.as_ref().map(|d| d.epoch) != Some(loss.epoch) {
            debug!(facing = %loss.facing, epoch = loss.epoch, "Ignoring loss of a released device");
            return;
        }
        warn!(facing = %loss.facing, error = %loss.error, "Camera lost, stopping");
        self.interrupt(&mut ctl).await;
        self.fail(&mut ctl, &AppError::Camera(loss.error)).await;
    }
}

/// Commands that were refused before touching any device
fn is_precondition(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Camera(CameraError::PermissionDenied)
            | AppError::Photo(PhotoError::NotInPictureMode)
            | AppError::Recording(
                RecordingError::NotInVideoMode
                    | RecordingError::AlreadyRecording
                    | RecordingError::NotRecording
            )
            | AppError::Other(_)
    )
}

fn report(signals: &Signals, error: &AppError) {
    if is_precondition(error) {
        debug!(error = %error, "Command refused");
        return;
    }
    signals.errors.emit(error.to_event(), &error.to_string());
}

async fn forward_device_losses(inner: Weak<Inner>, mut losses: mpsc::UnboundedReceiver<DeviceLoss>) {
    while let Some(loss) = losses.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Orchestrator { inner }.handle_device_loss(loss).await;
    }
}

/// Preview and recording: free-run the compositor until cancelled
async fn run_render_loop(
    signals: Arc<Signals>,
    kind: TaskKind,
    pipeline: Pipeline,
    cancel: CancelSignal,
    frame_rate: u32,
) {
    let mut compositor = FrameCompositor::new(
        pipeline.sources.clone(),
        signals.layout.subscribe(),
        signals.ui_overlay.subscribe(),
    );
    let result = pipeline
        .context
        .render_loop(
            move |scope| compositor.consume_and_draw(scope),
            cancel.clone(),
            frame_interval(frame_rate),
        )
        .await;
    pipeline.teardown().await;

    match result {
        Ok(frames) => info!(?kind, frames, "Render loop finished"),
        Err(e) if cancel.is_cancelled() => debug!(?kind, error = %e, "Render loop ended during cancel"),
        Err(e) => {
            signals.state.set(State::Idle);
            signals.errors.emit(ErrorEvent::UnknownError, &e.to_string());
        }
    }
}

/// Fresh frame from each camera, one composite, read back and persisted
async fn still_sequence(
    pipeline: &Pipeline,
    mut compositor: FrameCompositor,
    reader: &ImageReader,
    sink: &ImageSink,
    zoom: ZoomState,
) -> AppResult<PathBuf> {
    let sources = &pipeline.sources;
    for facing in [CameraFacing::Front, CameraFacing::Back] {
        sources.get(facing).discard_pending();
    }
    for facing in [CameraFacing::Front, CameraFacing::Back] {
        if let Some(session) = pipeline.session(facing) {
            session.capture(CaptureRequest::still(zoom.get(facing).current))?;
        }
    }

    let fresh = futures::future::try_join(
        sources.front.await_new_frame(&pipeline.context),
        sources.back.await_new_frame(&pipeline.context),
    );
    tokio::time::timeout(FRAME_WAIT_TIMEOUT, fresh)
        .await
        .map_err(|_| AppError::Photo(PhotoError::NoFrameAvailable))??;

    pipeline
        .context
        .render_once(move |scope| compositor.draw(scope))
        .await?;
    let buffer = reader.acquire_next(STILL_READBACK_TIMEOUT).await?;
    Ok(sink.consume(buffer).await?)
}
