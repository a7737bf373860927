// SPDX-License-Identifier: GPL-3.0-only

//! Camera-fed textures that outlive the rendering contexts they are drawn in
//!
//! A [`FrameSurfaceTexture`] is the producer side a capture session writes
//! into (through [`FrameSurfaceTexture::output_surface`]) and the consumer
//! side a render loop pulls from. The producer and any buffered frame persist
//! while the GPU texture it feeds is recreated with each context.

use crate::backends::camera::{FrameConsumer, FrameImage, OutputSurface, Resolution};
use crate::gpu::{ContextId, GpuRenderingContext, RenderScope, TextureId};
use crate::errors::RenderError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;

/// Where the surface's frames currently go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBinding {
    Unbound,
    Attached { context: ContextId, texture: TextureId },
    /// Its context was torn down; waiting for a new texture
    Detached,
    Released,
}

struct SurfaceInner {
    label: String,
    pending: AtomicBool,
    notify: Notify,
    buffer_size: Mutex<Resolution>,
    resized_at: Mutex<Instant>,
    latest: Mutex<Option<FrameImage>>,
    binding: Mutex<TextureBinding>,
    released: AtomicBool,
    delivered: AtomicU64,
    consumed: AtomicU64,
}

impl FrameConsumer for SurfaceInner {
    fn buffer_size(&self) -> Resolution {
        *self.buffer_size.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn queue_frame(&self, frame: FrameImage) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        *self.latest.lock().unwrap_or_else(|p| p.into_inner()) = Some(frame);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FrameSurfaceTexture {
    inner: Arc<SurfaceInner>,
}

impl FrameSurfaceTexture {
    pub fn new(label: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                label: label.into(),
                pending: AtomicBool::new(false),
                notify: Notify::new(),
                buffer_size: Mutex::new(resolution),
                resized_at: Mutex::new(Instant::now()),
                latest: Mutex::new(None),
                binding: Mutex::new(TextureBinding::Unbound),
                released: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                consumed: AtomicU64::new(0),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The handle a capture session delivers frames into
    pub fn output_surface(&self) -> OutputSurface {
        self.inner.clone()
    }

    pub fn resolution(&self) -> Resolution {
        self.inner.buffer_size()
    }

    /// Size the camera should produce; frames already buffered at another
    /// size are treated as stale
    pub fn set_resolution(&self, resolution: Resolution) {
        let mut size = self.inner.buffer_size.lock().unwrap_or_else(|p| p.into_inner());
        if *size != resolution {
            let previous = *size;
            debug!(surface = %self.inner.label, from = %previous, to = %resolution, "Surface resized");
            *size = resolution;
            *self.inner.resized_at.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
        }
    }

    pub fn binding(&self) -> TextureBinding {
        *self.inner.binding.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_detached(&self) -> bool {
        self.binding() == TextureBinding::Detached
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn frames_consumed(&self) -> u64 {
        self.inner.consumed.load(Ordering::Relaxed)
    }

    /// Point the surface at a texture of a new context
    ///
    /// A frame buffered from before the rebuild is marked pending again so
    /// the fresh texture gets it on the next consume.
    pub fn attach(&self, context: ContextId, texture: TextureId) -> Result<(), RenderError> {
        let mut binding = self.inner.binding.lock().unwrap_or_else(|p| p.into_inner());
        if *binding == TextureBinding::Released {
            return Err(RenderError::TextureNotAttached(format!(
                "{} has been released",
                self.inner.label
            )));
        }
        *binding = TextureBinding::Attached { context, texture };
        drop(binding);

        let buffered = self.inner.latest.lock().unwrap_or_else(|p| p.into_inner()).is_some();
        if buffered {
            self.inner.pending.store(true, Ordering::SeqCst);
        }
        debug!(surface = %self.inner.label, %context, texture = texture.0, "Surface attached");
        Ok(())
    }

    /// Drop the binding to the current texture, keeping the producer alive
    pub fn detach(&self) {
        let mut binding = self.inner.binding.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(*binding, TextureBinding::Attached { .. } | TextureBinding::Unbound) {
            *binding = TextureBinding::Detached;
            debug!(surface = %self.inner.label, "Surface detached");
        }
    }

    /// Stop accepting frames for good
    pub fn release(&self) {
        self.inner.released.store(true, Ordering::SeqCst);
        *self.inner.binding.lock().unwrap_or_else(|p| p.into_inner()) = TextureBinding::Released;
        *self.inner.latest.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.inner.pending.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Forget any frame delivered so far, so the next wait sees a new one
    pub fn discard_pending(&self) {
        self.inner.pending.store(false, Ordering::SeqCst);
    }

    /// The texture this surface feeds in `context`
    pub fn texture_in(&self, context: ContextId) -> Result<TextureId, RenderError> {
        match self.binding() {
            TextureBinding::Attached {
                context: bound,
                texture,
            } if bound == context => Ok(texture),
            other => Err(RenderError::TextureNotAttached(format!(
                "{} is {:?}, not attached to {}",
                self.inner.label, other, context
            ))),
        }
    }

    fn is_stale(&self, frame: &FrameImage) -> bool {
        let resized_at = *self.inner.resized_at.lock().unwrap_or_else(|p| p.into_inner());
        frame.captured_at < resized_at && frame.resolution() != self.resolution()
    }

    /// Upload the pending frame if there is one
    ///
    /// Never blocks: returns `Ok(false)` when nothing new arrived, leaving the
    /// texture with its previous contents.
    pub fn try_consume(&self, scope: &mut RenderScope<'_>) -> Result<bool, RenderError> {
        let texture = self.texture_in(scope.context_id())?;
        if !self.inner.pending.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let frame = self.inner.latest.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let Some(frame) = frame else {
            return Ok(false);
        };
        if self.is_stale(&frame) {
            return Err(RenderError::TransientGlitch(format!(
                "{}: {} frame from before resize to {}",
                self.inner.label,
                frame.resolution(),
                self.resolution()
            )));
        }
        scope.upload_texture(texture, &frame)?;
        self.inner.consumed.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn wait_pending(&self) -> Result<(), RenderError> {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.pending.load(Ordering::SeqCst) {
                return Ok(());
            }
            if self.is_released() {
                return Err(RenderError::TextureNotAttached(format!(
                    "{} has been released",
                    self.inner.label
                )));
            }
            notified.await;
        }
    }

    /// Wait for the camera to deliver a frame, then upload it
    pub async fn await_new_frame(&self, context: &GpuRenderingContext) -> Result<(), RenderError> {
        loop {
            self.wait_pending().await?;
            let surface = self.clone();
            if context.run(move |scope| surface.try_consume(scope)).await?? {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for FrameSurfaceTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSurfaceTexture")
            .field("label", &self.inner.label)
            .field("binding", &self.binding())
            .field("pending", &self.inner.pending.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ContextRegistry, FrameSink, OutputTarget, PixelLayout, RenderedFrame, RendererKind};
    use std::time::Duration;

    struct NullSink;

    impl FrameSink for NullSink {
        fn present(&self, _frame: RenderedFrame) -> Result<(), RenderError> {
            Ok(())
        }
    }

    async fn context() -> GpuRenderingContext {
        let registry = Arc::new(ContextRegistry::default());
        let target = OutputTarget::new("t", Resolution::new(4, 4), Arc::new(NullSink));
        let ctx = GpuRenderingContext::create(
            "surface-test",
            target,
            RendererKind::Software,
            PixelLayout::Rgba8,
            &registry,
        )
        .await
        .unwrap();
        ctx.prepare().await.unwrap();
        ctx
    }

    async fn attached(ctx: &GpuRenderingContext, surface: &FrameSurfaceTexture) {
        let texture = ctx.generate_texture().await.unwrap();
        surface.attach(ctx.id(), texture).unwrap();
    }

    #[tokio::test]
    async fn test_try_consume_only_when_pending() {
        let ctx = context().await;
        let surface = FrameSurfaceTexture::new("front", Resolution::new(4, 4));
        attached(&ctx, &surface).await;

        let s = surface.clone();
        assert!(!ctx.run(move |scope| s.try_consume(scope)).await.unwrap().unwrap());

        surface.output_surface().queue_frame(FrameImage::solid(4, 4, [1, 2, 3, 255]));
        let s = surface.clone();
        assert!(ctx.run(move |scope| s.try_consume(scope)).await.unwrap().unwrap());
        let s = surface.clone();
        assert!(!ctx.run(move |scope| s.try_consume(scope)).await.unwrap().unwrap());
        assert_eq!(surface.frames_consumed(), 1);

        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_requires_attachment_to_this_context() {
        let ctx = context().await;
        let surface = FrameSurfaceTexture::new("front", Resolution::new(4, 4));
        surface.output_surface().queue_frame(FrameImage::solid(4, 4, [1, 2, 3, 255]));

        let s = surface.clone();
        let result = ctx.run(move |scope| s.try_consume(scope)).await.unwrap();
        assert!(matches!(result, Err(RenderError::TextureNotAttached(_))));
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_reattach_replays_buffered_frame() {
        let first = context().await;
        let surface = FrameSurfaceTexture::new("back", Resolution::new(4, 4));
        attached(&first, &surface).await;
        surface.output_surface().queue_frame(FrameImage::solid(4, 4, [9, 9, 9, 255]));
        let s = surface.clone();
        assert!(first.run(move |scope| s.try_consume(scope)).await.unwrap().unwrap());

        let s = surface.clone();
        first.destroy(move |_| s.detach()).await.unwrap();
        assert!(surface.is_detached());

        let second = context().await;
        attached(&second, &surface).await;
        let s = surface.clone();
        assert!(second.run(move |scope| s.try_consume(scope)).await.unwrap().unwrap());
        second.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_frame_after_resize_is_transient() {
        let ctx = context().await;
        let surface = FrameSurfaceTexture::new("front", Resolution::new(4, 4));
        attached(&ctx, &surface).await;

        let old = FrameImage::solid(4, 4, [1, 1, 1, 255]);
        tokio::time::sleep(Duration::from_millis(2)).await;
        surface.set_resolution(Resolution::new(8, 8));
        surface.output_surface().queue_frame(old);

        let s = surface.clone();
        let result = ctx.run(move |scope| s.try_consume(scope)).await.unwrap();
        assert!(matches!(result, Err(ref e) if e.is_transient()));
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_await_new_frame() {
        let ctx = context().await;
        let surface = FrameSurfaceTexture::new("front", Resolution::new(4, 4));
        attached(&ctx, &surface).await;

        let producer = surface.output_surface();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.queue_frame(FrameImage::solid(4, 4, [5, 5, 5, 255]));
        });

        tokio::time::timeout(Duration::from_secs(2), surface.await_new_frame(&ctx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(surface.frames_consumed(), 1);
        ctx.destroy(|_| {}).await.unwrap();
    }

    #[test]
    fn test_released_surface_drops_frames() {
        let surface = FrameSurfaceTexture::new("front", Resolution::new(4, 4));
        surface.release();
        let producer = surface.output_surface();
        assert!(producer.is_released());
        producer.queue_frame(FrameImage::solid(4, 4, [0, 0, 0, 255]));
        assert_eq!(surface.frames_delivered(), 0);
        assert_eq!(surface.binding(), TextureBinding::Released);
        assert!(surface.attach(ContextId(1), TextureId(1)).is_err());
    }
}
