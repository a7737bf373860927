// SPDX-License-Identifier: GPL-3.0-only

//! One rendering context, its two camera textures and the sessions feeding them
//!
//! A [`Pipeline`] is built for exactly one output target and torn down as a
//! unit: zoom loops stop, sessions close, textures are deleted and detached
//! on the render thread, then the context is destroyed.

use super::compositor::CompositeSources;
use super::devices::DevicePair;
use super::surface_texture::FrameSurfaceTexture;
use super::task::TaskKind;
use super::zoom::{ZoomState, spawn_zoom_loop};
use crate::backends::camera::{
    CameraFacing, CaptureDeviceSessionManager, CaptureRequest, CaptureSession, ColorProfile,
    RequestTemplate, Resolution,
};
use crate::errors::AppResult;
use crate::gpu::{ContextRegistry, GpuRenderingContext, OutputTarget, PixelLayout, RendererKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Camera surfaces, one per (camera, sink) pairing, created on first use
#[derive(Default)]
pub struct SurfacePool {
    surfaces: HashMap<(CameraFacing, TaskKind), FrameSurfaceTexture>,
}

impl SurfacePool {
    /// Surfaces for `sink`, sized to `resolution`
    pub fn sources(&mut self, sink: TaskKind, resolution: Resolution) -> CompositeSources {
        let mut get = |facing: CameraFacing| {
            let surface = self
                .surfaces
                .entry((facing, sink))
                .or_insert_with(|| {
                    debug!(%facing, ?sink, %resolution, "Creating camera surface");
                    FrameSurfaceTexture::new(format!("{}-{:?}", facing, sink), resolution)
                })
                .clone();
            surface.set_resolution(resolution);
            surface
        };
        CompositeSources {
            front: get(CameraFacing::Front),
            back: get(CameraFacing::Back),
        }
    }

    /// Surfaces whose context is gone and that have not been reattached
    pub fn detached(&self) -> usize {
        self.surfaces.values().filter(|s| s.is_detached()).count()
    }

    /// Drop the surfaces of a sink that is gone for good
    pub fn release(&mut self, sink: TaskKind) {
        self.surfaces.retain(|(_, kind), surface| {
            if *kind == sink {
                surface.release();
            }
            *kind != sink
        });
    }

    /// Stop every producer for good
    pub fn release_all(&mut self) {
        for surface in self.surfaces.values() {
            surface.release();
        }
        self.surfaces.clear();
    }
}

/// How the two sessions of a pipeline are configured
#[derive(Debug, Clone, Copy)]
pub struct SessionPlan {
    pub profile: ColorProfile,
    /// Standing request to issue once both sessions exist
    pub repeating: Option<RequestTemplate>,
    pub frame_rate: u32,
}

/// Everything a pipeline build needs to know
pub struct PipelineSpec {
    pub sink: TaskKind,
    pub target: OutputTarget,
    pub renderer: RendererKind,
    pub sessions: SessionPlan,
}

pub struct Pipeline {
    pub context: GpuRenderingContext,
    pub sources: CompositeSources,
    sessions: Vec<(CameraFacing, CaptureSession)>,
    zoom_loops: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build a context on `spec.target`, attach both surfaces and configure
    /// one session per device, front first
    ///
    /// A failure at any step tears down whatever was already built.
    pub async fn build(
        spec: PipelineSpec,
        sources: CompositeSources,
        devices: &DevicePair,
        manager: &CaptureDeviceSessionManager,
        registry: &Arc<ContextRegistry>,
        zoom: watch::Receiver<ZoomState>,
    ) -> AppResult<Self> {
        let PipelineSpec {
            sink,
            target,
            renderer,
            sessions: plan,
        } = spec;
        let label = format!("{:?}", sink).to_lowercase();
        let context = GpuRenderingContext::create(
            &label,
            target,
            renderer,
            PixelLayout::from(plan.profile),
            registry,
        )
        .await?;

        let mut pipeline = Self {
            context,
            sources,
            sessions: Vec::with_capacity(2),
            zoom_loops: Vec::with_capacity(2),
        };
        match pipeline.configure(plan, devices, manager, zoom).await {
            Ok(()) => {
                info!(context = %pipeline.context.id(), sink = %label, "Pipeline ready");
                Ok(pipeline)
            }
            Err(e) => {
                warn!(sink = %label, error = %e, "Pipeline build failed");
                pipeline.teardown().await;
                Err(e)
            }
        }
    }

    async fn configure(
        &mut self,
        plan: SessionPlan,
        devices: &DevicePair,
        manager: &CaptureDeviceSessionManager,
        zoom: watch::Receiver<ZoomState>,
    ) -> AppResult<()> {
        self.context.prepare().await?;
        for facing in [CameraFacing::Front, CameraFacing::Back] {
            let texture = self.context.generate_texture().await?;
            self.sources.get(facing).attach(self.context.id(), texture)?;
        }

        for (facing, device) in devices.in_order() {
            let surface = self.sources.get(facing).output_surface();
            let session = manager
                .create_session(&device.handle, vec![surface], plan.profile)
                .await?;
            self.sessions.push((facing, session));
        }

        let zoom_now = *zoom.borrow();
        for (facing, session) in &self.sessions {
            let ratio = zoom_now.get(*facing).current;
            if let Some(template) = plan.repeating {
                session.set_repeating(CaptureRequest::repeating(template, ratio, plan.frame_rate))?;
            }
            self.zoom_loops
                .push(spawn_zoom_loop(*facing, session.clone(), zoom.clone(), ratio));
        }
        Ok(())
    }

    pub fn session(&self, facing: CameraFacing) -> Option<&CaptureSession> {
        self.sessions
            .iter()
            .find(|(f, _)| *f == facing)
            .map(|(_, session)| session)
    }

    /// Release everything in dependency order
    pub async fn teardown(self) {
        let Pipeline {
            context,
            sources,
            sessions,
            zoom_loops,
        } = self;

        for zoom_loop in zoom_loops {
            zoom_loop.abort();
        }
        for (_, session) in &sessions {
            session.close();
        }

        let id = context.id();
        let result = context
            .destroy(move |scope| {
                for surface in [&sources.front, &sources.back] {
                    if let Ok(texture) = surface.texture_in(scope.context_id()) {
                        scope.delete_texture(texture);
                    }
                    surface.detach();
                }
            })
            .await;
        match result {
            Ok(()) => debug!(context = %id, sessions = sessions.len(), "Pipeline torn down"),
            Err(e) => warn!(context = %id, error = %e, "Pipeline teardown incomplete"),
        }
    }
}
