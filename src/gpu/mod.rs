// SPDX-License-Identifier: GPL-3.0-only

//! Single-threaded offscreen rendering contexts
//!
//! A [`GpuRenderingContext`] owns one render thread. The backend (wgpu or the
//! CPU rasterizer) is created on that thread and never leaves it; all work is
//! submitted as jobs and runs strictly in submission order.
//!
//! ```text
//!  async callers ──jobs──► render thread ──present──► OutputTarget ──► FrameSink
//!                            │
//!                            └── RenderBackend (textures, draws, readback)
//! ```

pub mod device;
pub mod software;
pub mod transform;
pub mod wgpu_backend;

pub use transform::Mat4;

use crate::app::task::CancelSignal;
use crate::backends::camera::{ColorProfile, FrameImage, Resolution};
use crate::constants::render::CLEAR_COLOR;
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::RenderError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Texture name inside one rendering context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Which compositor implementation a context uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RendererKind {
    /// wgpu when an adapter is available, otherwise software
    #[default]
    Auto,
    Gpu,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    Alpha,
}

/// Pixel layout of a rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8 bits per channel RGBA
    Rgba8,
    /// Packed little-endian u32: 10 bits R, G, B then 2 bits A
    Rgb10a2,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

impl From<ColorProfile> for PixelLayout {
    fn from(profile: ColorProfile) -> Self {
        match profile {
            ColorProfile::Standard => PixelLayout::Rgba8,
            ColorProfile::ExtendedRange => PixelLayout::Rgb10a2,
        }
    }
}

/// One composited frame read back from a context
///
/// Rows are `stride` bytes apart; the tail of each row is padding.
#[derive(Clone)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub layout: PixelLayout,
    pub data: Arc<[u8]>,
    pub sequence: u64,
}

impl RenderedFrame {
    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y * self.stride) as usize;
        let len = (self.width * self.layout.bytes_per_pixel()) as usize;
        &self.data[start..start + len]
    }

    /// Pixel rows without padding
    pub fn tight_rows(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity((self.width * self.height * self.layout.bytes_per_pixel()) as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    pub fn pixel_rgba8(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (x * 4) as usize;
        let px = &self.row(y)[offset..offset + 4];
        match self.layout {
            PixelLayout::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelLayout::Rgb10a2 => unpack_rgb10a2(u32::from_le_bytes([px[0], px[1], px[2], px[3]])),
        }
    }

    /// Tightly packed RGBA8, converting 10-bit frames down
    pub fn to_rgba8(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Rgba8 => self.tight_rows(),
            PixelLayout::Rgb10a2 => {
                let mut out = Vec::with_capacity((self.width * self.height * 4) as usize);
                for y in 0..self.height {
                    for x in 0..self.width {
                        out.extend_from_slice(&self.pixel_rgba8(x, y));
                    }
                }
                out
            }
        }
    }
}

impl std::fmt::Debug for RenderedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .finish()
    }
}

pub fn pack_rgb10a2(rgba: [u8; 4]) -> u32 {
    let widen = |v: u8| (v as u32 * 1023 + 127) / 255;
    widen(rgba[0]) | (widen(rgba[1]) << 10) | (widen(rgba[2]) << 20) | ((rgba[3] as u32 / 85) << 30)
}

pub fn unpack_rgb10a2(packed: u32) -> [u8; 4] {
    let narrow = |v: u32| ((v & 0x3ff) * 255 + 511) / 1023;
    [
        narrow(packed) as u8,
        narrow(packed >> 10) as u8,
        narrow(packed >> 20) as u8,
        ((packed >> 30) * 85) as u8,
    ]
}

/// Consumer of presented frames: a preview surface, an image reader, an encoder input
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: RenderedFrame) -> Result<(), RenderError>;
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct TargetInner {
    id: u64,
    label: String,
    size: Resolution,
    sink: Arc<dyn FrameSink>,
    bound: AtomicBool,
}

/// A presentable surface: what a rendering context draws for
///
/// At most one live context may be bound to a target at a time.
#[derive(Clone)]
pub struct OutputTarget {
    inner: Arc<TargetInner>,
}

impl OutputTarget {
    pub fn new(label: impl Into<String>, size: Resolution, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                size,
                sink,
                bound: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn size(&self) -> Resolution {
        self.inner.size
    }

    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::clone(&self.inner.sink)
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound.load(Ordering::SeqCst)
    }

    fn bind(&self) -> Result<SurfaceBinding, RenderError> {
        self.inner
            .bound
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RenderError::SurfaceAlreadyBound(self.inner.label.clone()))?;
        Ok(SurfaceBinding {
            target: self.clone(),
        })
    }
}

impl PartialEq for OutputTarget {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("label", &self.inner.label)
            .field("size", &self.inner.size)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Releases the target when the owning context's thread ends
struct SurfaceBinding {
    target: OutputTarget,
}

impl Drop for SurfaceBinding {
    fn drop(&mut self) {
        self.target.inner.bound.store(false, Ordering::SeqCst);
    }
}

/// Counts rendering contexts that have not finished tearing down
#[derive(Debug, Default)]
pub struct ContextRegistry {
    live: AtomicUsize,
    created: AtomicU64,
}

impl ContextRegistry {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> LiveContext {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        LiveContext {
            registry: Arc::clone(self),
        }
    }
}

struct LiveContext {
    registry: Arc<ContextRegistry>,
}

impl Drop for LiveContext {
    fn drop(&mut self) {
        self.registry.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drawing primitives a compositor backend provides
///
/// Implementations are created on and confined to one render thread.
pub trait RenderBackend {
    fn name(&self) -> &'static str;

    /// Allocate the offscreen target
    fn prepare(&mut self, size: Resolution, layout: PixelLayout) -> Result<(), RenderError>;

    /// New texture holding a single black pixel
    fn generate_texture(&mut self) -> Result<TextureId, RenderError>;

    /// Replace a texture's contents, resizing it to the image
    fn upload_texture(&mut self, texture: TextureId, image: &FrameImage) -> Result<(), RenderError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Start a new frame filled with `color`
    fn clear(&mut self, color: [f32; 4]);

    /// Draw the unit quad textured with `texture`, placed by `transform`
    fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError>;

    /// Finish the frame and read it back
    fn read_pixels(&mut self) -> Result<RenderedFrame, RenderError>;

    fn release(&mut self);
}

/// Create a backend on the calling thread
pub fn create_backend(kind: RendererKind) -> Result<Box<dyn RenderBackend>, RenderError> {
    match kind {
        RendererKind::Software => Ok(Box::new(software::SoftwareRenderer::new())),
        RendererKind::Gpu => Ok(Box::new(wgpu_backend::WgpuRenderer::new()?)),
        RendererKind::Auto => match wgpu_backend::WgpuRenderer::new() {
            Ok(renderer) => Ok(Box::new(renderer)),
            Err(e) => {
                warn!(error = %e, "GPU unavailable, compositing in software");
                Ok(Box::new(software::SoftwareRenderer::new()))
            }
        },
    }
}

/// Access to a context from inside one of its jobs
pub struct RenderScope<'a> {
    backend: &'a mut dyn RenderBackend,
    target: &'a OutputTarget,
    context: ContextId,
    owner: ThreadId,
    prepared: &'a mut bool,
    shutdown: bool,
}

impl RenderScope<'_> {
    fn assert_owner(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "rendering call off the context's render thread"
        );
    }

    fn ensure_prepared(&self) -> Result<(), RenderError> {
        self.assert_owner();
        if *self.prepared {
            Ok(())
        } else {
            Err(RenderError::NotPrepared)
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    fn prepare(&mut self, layout: PixelLayout) -> Result<(), RenderError> {
        self.assert_owner();
        self.backend.prepare(self.target.size(), layout)?;
        *self.prepared = true;
        Ok(())
    }

    pub fn generate_texture(&mut self) -> Result<TextureId, RenderError> {
        self.ensure_prepared()?;
        self.backend.generate_texture()
    }

    pub fn upload_texture(&mut self, texture: TextureId, image: &FrameImage) -> Result<(), RenderError> {
        self.ensure_prepared()?;
        self.backend.upload_texture(texture, image)
    }

    pub fn delete_texture(&mut self, texture: TextureId) {
        self.assert_owner();
        self.backend.delete_texture(texture);
    }

    pub fn clear(&mut self) {
        self.assert_owner();
        self.backend.clear(CLEAR_COLOR);
    }

    pub fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError> {
        self.ensure_prepared()?;
        self.backend.draw_texture(texture, transform, blend)
    }

    /// Read the frame back and hand it to the target's sink
    pub fn present(&mut self) -> Result<(), RenderError> {
        self.ensure_prepared()?;
        let frame = self.backend.read_pixels()?;
        self.target.sink().present(frame)
    }
}

type Job = Box<dyn FnOnce(&mut RenderScope<'_>) + Send>;

/// A rendering context bound to one output target
pub struct GpuRenderingContext {
    id: ContextId,
    label: String,
    layout: PixelLayout,
    jobs: mpsc::UnboundedSender<Job>,
    exited: Option<oneshot::Receiver<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl GpuRenderingContext {
    /// Bind `target` and start the render thread
    ///
    /// Fails with [`RenderError::SurfaceAlreadyBound`] while another context
    /// holds the target.
    pub async fn create(
        label: &str,
        target: OutputTarget,
        kind: RendererKind,
        layout: PixelLayout,
        registry: &Arc<ContextRegistry>,
    ) -> Result<Self, RenderError> {
        let binding = target.bind()?;
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let live = registry.enter();

        let (jobs, rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let thread_target = target.clone();

        let thread = thread::Builder::new()
            .name(format!("render-{}", label))
            .spawn(move || {
                render_thread(id, kind, thread_target, rx, ready_tx);
                drop(binding);
                drop(live);
                let _ = exit_tx.send(());
            })
            .map_err(|e| RenderError::Fatal(format!("failed to spawn render thread: {}", e)))?;

        let backend = match ready_rx.await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(RenderError::ContextLost),
        };

        info!(
            context = %id,
            label,
            backend,
            target = target.label(),
            size = %target.size(),
            "Rendering context created"
        );

        Ok(Self {
            id,
            label: label.to_string(),
            layout,
            jobs,
            exited: Some(exit_rx),
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Run `f` on the render thread after all previously submitted work
    pub async fn run<R, F>(&self, f: F) -> Result<R, RenderError>
    where
        F: FnOnce(&mut RenderScope<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |scope| {
            let _ = tx.send(f(scope));
        });
        self.jobs.send(job).map_err(|_| RenderError::ContextLost)?;
        rx.await.map_err(|_| RenderError::ContextLost)
    }

    /// Allocate the offscreen target at the output's size
    pub async fn prepare(&self) -> Result<(), RenderError> {
        let layout = self.layout;
        self.run(move |scope| scope.prepare(layout)).await?
    }

    pub async fn generate_texture(&self) -> Result<TextureId, RenderError> {
        self.run(|scope| scope.generate_texture()).await?
    }

    /// Clear, draw and present frames until `stop` is signalled
    ///
    /// The stop signal is checked between frames only. Transient errors skip a
    /// frame; anything else ends the loop with that error. Returns the number
    /// of frames presented.
    pub async fn render_loop<F>(
        &self,
        mut frame_fn: F,
        stop: CancelSignal,
        frame_interval: Duration,
    ) -> Result<u64, RenderError>
    where
        F: FnMut(&mut RenderScope<'_>) -> Result<(), RenderError> + Send + 'static,
    {
        let id = self.id;
        self.run(move |scope| {
            let mut frames = 0u64;
            let mut skipped = 0u64;
            loop {
                if stop.is_cancelled() {
                    debug!(context = %id, frames, skipped, "Render loop stopped");
                    return Ok(frames);
                }
                let started = Instant::now();

                scope.clear();
                match frame_fn(scope).and_then(|()| scope.present()) {
                    Ok(()) => {
                        frames += 1;
                        if frames % FRAME_LOG_INTERVAL == 0 {
                            debug!(context = %id, frames, "Frames presented");
                        }
                    }
                    Err(e) if e.is_transient() => {
                        skipped += 1;
                        debug!(context = %id, error = %e, "Skipping frame");
                    }
                    Err(e) => {
                        error!(context = %id, error = %e, "Render loop failed");
                        return Err(e);
                    }
                }

                if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
            }
        })
        .await?
    }

    /// Clear, draw and present exactly one frame
    pub async fn render_once<F>(&self, frame_fn: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut RenderScope<'_>) -> Result<(), RenderError> + Send + 'static,
    {
        self.run(move |scope| {
            scope.clear();
            frame_fn(scope)?;
            scope.present()
        })
        .await?
    }

    /// Run `pre_cleanup` on the render thread, then release everything
    ///
    /// Resolves once the thread has exited, the output target is free and the
    /// context no longer counts as live.
    pub async fn destroy<F>(mut self, pre_cleanup: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut RenderScope<'_>) + Send + 'static,
    {
        let job: Job = Box::new(move |scope| {
            pre_cleanup(scope);
            scope.shutdown = true;
        });
        let sent = self.jobs.send(job).is_ok();

        if let Some(exited) = self.exited.take() {
            let _ = exited.await;
        }
        if let Some(handle) = self.thread.take() {
            if let Ok(Err(e)) = tokio::task::spawn_blocking(move || handle.join()).await {
                warn!(context = %self.id, "Render thread panicked: {:?}", e);
            }
        }

        info!(context = %self.id, label = %self.label, "Rendering context destroyed");
        if sent {
            Ok(())
        } else {
            Err(RenderError::ContextLost)
        }
    }
}

impl Drop for GpuRenderingContext {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Closing the job channel ends the thread, which releases the target
            debug!(context = %self.id, "Rendering context dropped without destroy");
        }
    }
}

fn render_thread(
    id: ContextId,
    kind: RendererKind,
    target: OutputTarget,
    mut rx: mpsc::UnboundedReceiver<Job>,
    ready: oneshot::Sender<Result<&'static str, RenderError>>,
) {
    let mut backend = match create_backend(kind) {
        Ok(backend) => backend,
        Err(e) => {
            error!(context = %id, error = %e, "Failed to create render backend");
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(backend.name()));

    let owner = thread::current().id();
    let mut prepared = false;

    while let Some(job) = rx.blocking_recv() {
        let mut scope = RenderScope {
            backend: backend.as_mut(),
            target: &target,
            context: id,
            owner,
            prepared: &mut prepared,
            shutdown: false,
        };
        job(&mut scope);
        if scope.shutdown {
            break;
        }
    }

    backend.release();
    debug!(context = %id, "Render thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<RenderedFrame>>,
    }

    impl FrameSink for CollectingSink {
        fn present(&self, frame: RenderedFrame) -> Result<(), RenderError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    async fn software_context(
        target: &OutputTarget,
        registry: &Arc<ContextRegistry>,
    ) -> Result<GpuRenderingContext, RenderError> {
        GpuRenderingContext::create(
            "test",
            target.clone(),
            RendererKind::Software,
            PixelLayout::Rgba8,
            registry,
        )
        .await
    }

    #[tokio::test]
    async fn test_target_binds_once() {
        let registry = Arc::new(ContextRegistry::default());
        let sink = Arc::new(CollectingSink::default());
        let target = OutputTarget::new("preview", Resolution::new(8, 8), sink);

        let first = software_context(&target, &registry).await.unwrap();
        assert!(target.is_bound());
        let second = software_context(&target, &registry).await;
        assert!(matches!(second.err(), Some(RenderError::SurfaceAlreadyBound(_))));
        assert_eq!(registry.live(), 1);

        first.destroy(|_| {}).await.unwrap();
        assert!(!target.is_bound());
        assert_eq!(registry.live(), 0);

        let again = software_context(&target, &registry).await.unwrap();
        again.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_draw_before_prepare_fails() {
        let registry = Arc::new(ContextRegistry::default());
        let target = OutputTarget::new("t", Resolution::new(4, 4), Arc::new(CollectingSink::default()));
        let ctx = software_context(&target, &registry).await.unwrap();

        let result = ctx.generate_texture().await;
        assert_eq!(result.err(), Some(RenderError::NotPrepared));
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_render_once_presents_padded_frame() {
        let registry = Arc::new(ContextRegistry::default());
        let sink = Arc::new(CollectingSink::default());
        let target = OutputTarget::new("t", Resolution::new(10, 4), sink.clone());
        let ctx = software_context(&target, &registry).await.unwrap();
        ctx.prepare().await.unwrap();

        let texture = ctx.generate_texture().await.unwrap();
        ctx.render_once(move |scope| {
            scope.upload_texture(texture, &FrameImage::solid(2, 2, [255, 0, 0, 255]))?;
            scope.draw_texture(texture, &Mat4::IDENTITY, BlendMode::Replace)
        })
        .await
        .unwrap();

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stride, 256);
        assert_eq!(frames[0].pixel_rgba8(5, 2), [255, 0, 0, 255]);
        drop(frames);

        ctx.destroy(move |scope| scope.delete_texture(texture)).await.unwrap();
    }

    #[tokio::test]
    async fn test_render_loop_stops_on_cancel() {
        let registry = Arc::new(ContextRegistry::default());
        let sink = Arc::new(CollectingSink::default());
        let target = OutputTarget::new("t", Resolution::new(4, 4), sink.clone());
        let ctx = Arc::new(software_context(&target, &registry).await.unwrap());
        ctx.prepare().await.unwrap();

        let stop = CancelSignal::new();
        let looping = {
            let ctx = Arc::clone(&ctx);
            let stop = stop.clone();
            tokio::spawn(async move {
                ctx.render_loop(|_| Ok(()), stop, Duration::from_millis(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        let frames = looping.await.unwrap().unwrap();
        assert!(frames > 0);
        assert_eq!(frames as usize, sink.frames.lock().unwrap().len());

        let ctx = Arc::try_unwrap(ctx).ok().unwrap();
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_errors_skip_frames() {
        let registry = Arc::new(ContextRegistry::default());
        let sink = Arc::new(CollectingSink::default());
        let target = OutputTarget::new("t", Resolution::new(4, 4), sink.clone());
        let ctx = software_context(&target, &registry).await.unwrap();
        ctx.prepare().await.unwrap();

        let stop = CancelSignal::new();
        let stop_inner = stop.clone();
        let mut calls = 0;
        let frames = ctx
            .render_loop(
                move |_| {
                    calls += 1;
                    if calls == 5 {
                        stop_inner.cancel();
                    }
                    if calls % 2 == 0 {
                        Err(RenderError::TransientGlitch("stale frame".into()))
                    } else {
                        Ok(())
                    }
                },
                stop,
                Duration::ZERO,
            )
            .await
            .unwrap();

        assert_eq!(frames, 3);
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_ends_loop() {
        let registry = Arc::new(ContextRegistry::default());
        let target = OutputTarget::new("t", Resolution::new(4, 4), Arc::new(CollectingSink::default()));
        let ctx = software_context(&target, &registry).await.unwrap();
        ctx.prepare().await.unwrap();

        let result = ctx
            .render_loop(
                |_| Err(RenderError::Fatal("device lost".into())),
                CancelSignal::new(),
                Duration::ZERO,
            )
            .await;
        assert_eq!(result, Err(RenderError::Fatal("device lost".into())));
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[test]
    fn test_rgb10a2_packing() {
        assert_eq!(unpack_rgb10a2(pack_rgb10a2([255, 0, 128, 255])), [255, 0, 128, 255]);
        let packed = pack_rgb10a2([255, 255, 255, 255]);
        assert_eq!(packed, u32::MAX);
    }
}
