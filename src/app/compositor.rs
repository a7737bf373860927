// SPDX-License-Identifier: GPL-3.0-only

//! Picture-in-picture compositing of the two camera textures
//!
//! Per frame: background full-frame, then the overlay on top of it, both
//! opaque; an optional UI layer is alpha-blended last. `flip` selects which
//! camera is the background.

use super::surface_texture::FrameSurfaceTexture;
use crate::backends::camera::{CameraFacing, FrameImage};
use crate::constants::pip;
use crate::errors::RenderError;
use crate::gpu::{BlendMode, Mat4, RenderScope, TextureId};
use tokio::sync::watch;

/// Compositor inputs read every frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeLayout {
    /// Front camera as background instead of the back camera
    pub flip: bool,
    /// Rotate both layers a quarter turn
    pub landscape: bool,
    pub overlay_scale: f32,
    /// Overlay center in normalized device coordinates
    pub overlay_offset: (f32, f32),
}

impl Default for CompositeLayout {
    fn default() -> Self {
        Self {
            flip: false,
            landscape: false,
            overlay_scale: pip::DEFAULT_SCALE,
            overlay_offset: pip::DEFAULT_OFFSET,
        }
    }
}

impl CompositeLayout {
    /// Scale into `[MIN_SCALE, MAX_SCALE]`, offsets into `[-1, 1]`
    pub fn clamped(mut self) -> Self {
        self.overlay_scale = if self.overlay_scale.is_nan() {
            pip::DEFAULT_SCALE
        } else {
            self.overlay_scale.clamp(pip::MIN_SCALE, pip::MAX_SCALE)
        };
        let clamp_offset = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) };
        self.overlay_offset = (clamp_offset(self.overlay_offset.0), clamp_offset(self.overlay_offset.1));
        self
    }

    /// (background, overlay) cameras
    pub fn assign(&self) -> (CameraFacing, CameraFacing) {
        if self.flip {
            (CameraFacing::Front, CameraFacing::Back)
        } else {
            (CameraFacing::Back, CameraFacing::Front)
        }
    }

    fn orientation(&self) -> Mat4 {
        if self.landscape {
            Mat4::rotation_z(90.0)
        } else {
            Mat4::IDENTITY
        }
    }

    pub fn background_transform(&self) -> Mat4 {
        self.orientation()
    }

    /// Rotation, then scale, then translation
    pub fn overlay_transform(&self) -> Mat4 {
        let (dx, dy) = self.overlay_offset;
        Mat4::translation(dx, dy)
            .mul(&Mat4::scale(self.overlay_scale, self.overlay_scale))
            .mul(&self.orientation())
    }
}

/// UI-drawn layer blended over the camera layers
///
/// Compared by revision so replacing the image always counts as a change.
#[derive(Debug, Clone, Default)]
pub struct UiOverlay {
    image: Option<FrameImage>,
    revision: u64,
}

impl UiOverlay {
    pub fn replaced(&self, image: Option<FrameImage>) -> Self {
        Self {
            image,
            revision: self.revision + 1,
        }
    }

    pub fn image(&self) -> Option<&FrameImage> {
        self.image.as_ref()
    }
}

impl PartialEq for UiOverlay {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
    }
}

/// The two camera surfaces of one pipeline
#[derive(Debug, Clone)]
pub struct CompositeSources {
    pub front: FrameSurfaceTexture,
    pub back: FrameSurfaceTexture,
}

impl CompositeSources {
    pub fn get(&self, facing: CameraFacing) -> &FrameSurfaceTexture {
        match facing {
            CameraFacing::Front => &self.front,
            CameraFacing::Back => &self.back,
        }
    }
}

/// Draws one composite frame into the scope's context
pub struct FrameCompositor {
    sources: CompositeSources,
    layout: watch::Receiver<CompositeLayout>,
    ui_overlay: watch::Receiver<UiOverlay>,
    ui_texture: Option<TextureId>,
    ui_revision: u64,
}

impl FrameCompositor {
    pub fn new(
        sources: CompositeSources,
        layout: watch::Receiver<CompositeLayout>,
        ui_overlay: watch::Receiver<UiOverlay>,
    ) -> Self {
        Self {
            sources,
            layout,
            ui_overlay,
            ui_texture: None,
            ui_revision: 0,
        }
    }

    /// Pull whatever frames arrived, then draw
    ///
    /// Both surfaces are polled even if the first reports a stale frame.
    pub fn consume_and_draw(&mut self, scope: &mut RenderScope<'_>) -> Result<(), RenderError> {
        let front = self.sources.front.try_consume(scope);
        let back = self.sources.back.try_consume(scope);
        front?;
        back?;
        self.draw(scope)
    }

    /// Draw the current texture contents
    pub fn draw(&mut self, scope: &mut RenderScope<'_>) -> Result<(), RenderError> {
        let layout = *self.layout.borrow();
        let (background, overlay) = layout.assign();
        let context = scope.context_id();
        let background = self.sources.get(background).texture_in(context)?;
        let overlay = self.sources.get(overlay).texture_in(context)?;

        scope.draw_texture(background, &layout.background_transform(), BlendMode::Replace)?;
        scope.draw_texture(overlay, &layout.overlay_transform(), BlendMode::Replace)?;
        self.draw_ui(scope)
    }

    fn draw_ui(&mut self, scope: &mut RenderScope<'_>) -> Result<(), RenderError> {
        let ui = self.ui_overlay.borrow().clone();
        let Some(image) = ui.image else {
            return Ok(());
        };
        let texture = match self.ui_texture {
            Some(texture) => texture,
            None => {
                let texture = scope.generate_texture()?;
                self.ui_texture = Some(texture);
                texture
            }
        };
        if self.ui_revision != ui.revision {
            scope.upload_texture(texture, &image)?;
            self.ui_revision = ui.revision;
        }
        scope.draw_texture(texture, &Mat4::IDENTITY, BlendMode::Alpha)
    }
}
