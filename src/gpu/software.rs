// SPDX-License-Identifier: GPL-3.0-only

//! CPU compositing backend
//!
//! Rasterizes textured quads by mapping each covered pixel back into quad
//! space with the inverse transform and sampling the nearest texel. Used when
//! no GPU adapter is available and by tests.

use super::transform::quad_uv;
use super::{BlendMode, Mat4, PixelLayout, RenderBackend, RenderedFrame, TextureId, pack_rgb10a2};
use crate::backends::camera::{FrameImage, Resolution};
use crate::constants::render::padded_bytes_per_row;
use crate::errors::RenderError;
use std::collections::HashMap;
use std::sync::Arc;

struct Texture {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Texture {
    fn black() -> Self {
        Self {
            width: 1,
            height: 1,
            data: Arc::from(&[0u8, 0, 0, 255][..]),
        }
    }

    fn sample(&self, u: f32, v: f32) -> [u8; 4] {
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

pub struct SoftwareRenderer {
    size: Resolution,
    layout: PixelLayout,
    frame: Vec<u8>,
    textures: HashMap<u32, Texture>,
    next_texture: u32,
    sequence: u64,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            size: Resolution::new(0, 0),
            layout: PixelLayout::Rgba8,
            frame: Vec::new(),
            textures: HashMap::new(),
            next_texture: 1,
            sequence: 0,
        }
    }

    /// Pixel-space bounding box of the transformed unit quad, clipped to the frame
    fn coverage(&self, transform: &Mat4) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (self.size.width as f32, self.size.height as f32);
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .map(|(x, y)| transform.transform_point(x, y))
            .map(|(x, y)| ((x + 1.0) * 0.5 * w, (1.0 - y) * 0.5 * h));

        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().min(w) as u32).min(self.size.width);
        let y1 = (max_y.ceil().min(h) as u32).min(self.size.height);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for SoftwareRenderer {
    fn name(&self) -> &'static str {
        "software"
    }

    fn prepare(&mut self, size: Resolution, layout: PixelLayout) -> Result<(), RenderError> {
        if size.width == 0 || size.height == 0 {
            return Err(RenderError::Fatal(format!("invalid output size {}", size)));
        }
        self.size = size;
        self.layout = layout;
        self.frame = vec![0; (size.width * size.height * 4) as usize];
        Ok(())
    }

    fn generate_texture(&mut self) -> Result<TextureId, RenderError> {
        let id = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(id, Texture::black());
        Ok(TextureId(id))
    }

    fn upload_texture(&mut self, texture: TextureId, image: &FrameImage) -> Result<(), RenderError> {
        let slot = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| RenderError::TextureNotAttached(format!("texture {}", texture.0)))?;
        if image.width == 0 || image.height == 0 {
            return Err(RenderError::TransientGlitch("empty frame".into()));
        }
        if image.data.len() < (image.width * image.height * 4) as usize {
            return Err(RenderError::TransientGlitch(format!(
                "short frame: {} bytes for {}x{}",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        *slot = Texture {
            width: image.width,
            height: image.height,
            data: Arc::clone(&image.data),
        };
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let rgba = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        for px in self.frame.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| RenderError::TextureNotAttached(format!("texture {}", texture.0)))?;
        let Some(inverse) = transform.inverse_affine_2d() else {
            return Ok(());
        };
        let Some((x0, y0, x1, y1)) = self.coverage(transform) else {
            return Ok(());
        };

        let (w, h) = (self.size.width as f32, self.size.height as f32);
        for py in y0..y1 {
            let ndc_y = 1.0 - (py as f32 + 0.5) / h * 2.0;
            for px in x0..x1 {
                let ndc_x = (px as f32 + 0.5) / w * 2.0 - 1.0;
                let (qx, qy) = inverse.transform_point(ndc_x, ndc_y);
                if qx.abs() > 1.0 || qy.abs() > 1.0 {
                    continue;
                }
                let (u, v) = quad_uv(qx, qy);
                let src = tex.sample(u, v);
                let i = ((py * self.size.width + px) * 4) as usize;
                let dst = &mut self.frame[i..i + 4];
                match blend {
                    BlendMode::Replace => dst.copy_from_slice(&src),
                    BlendMode::Alpha => {
                        let a = src[3] as f32 / 255.0;
                        for c in 0..3 {
                            dst[c] = (src[c] as f32 * a + dst[c] as f32 * (1.0 - a)).round() as u8;
                        }
                        dst[3] = (src[3] as f32 + dst[3] as f32 * (1.0 - a)).round().min(255.0) as u8;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<RenderedFrame, RenderError> {
        if self.frame.is_empty() {
            return Err(RenderError::NotPrepared);
        }
        let (width, height) = (self.size.width, self.size.height);
        let stride = padded_bytes_per_row(width, 4);
        let row_len = (width * 4) as usize;
        let mut data = vec![0u8; (stride * height) as usize];

        for (y, src) in self.frame.chunks_exact(row_len).enumerate() {
            let dst = &mut data[y * stride as usize..y * stride as usize + row_len];
            match self.layout {
                PixelLayout::Rgba8 => dst.copy_from_slice(src),
                PixelLayout::Rgb10a2 => {
                    for (out, px) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                        let packed = pack_rgb10a2([px[0], px[1], px[2], px[3]]);
                        out.copy_from_slice(&packed.to_le_bytes());
                    }
                }
            }
        }

        self.sequence += 1;
        Ok(RenderedFrame {
            width,
            height,
            stride,
            layout: self.layout,
            data: Arc::from(data),
            sequence: self.sequence,
        })
    }

    fn release(&mut self) {
        self.textures.clear();
        self.frame = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(w: u32, h: u32) -> SoftwareRenderer {
        let mut r = SoftwareRenderer::new();
        r.prepare(Resolution::new(w, h), PixelLayout::Rgba8).unwrap();
        r
    }

    #[test]
    fn test_new_texture_is_black() {
        let mut r = renderer(4, 4);
        r.clear([1.0, 1.0, 1.0, 1.0]);
        let t = r.generate_texture().unwrap();
        r.draw_texture(t, &Mat4::IDENTITY, BlendMode::Replace).unwrap();
        let frame = r.read_pixels().unwrap();
        assert_eq!(frame.pixel_rgba8(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn test_scaled_quad_covers_its_corner_only() {
        let mut r = renderer(40, 40);
        r.clear([0.0, 0.0, 0.0, 1.0]);
        let t = r.generate_texture().unwrap();
        r.upload_texture(t, &FrameImage::solid(4, 4, [0, 255, 0, 255])).unwrap();

        // Quad spanning x in [0.5, 1], y in [0.5, 1]: the top right corner
        let m = Mat4::translation(0.75, 0.75).mul(&Mat4::scale(0.25, 0.25));
        r.draw_texture(t, &m, BlendMode::Replace).unwrap();

        let frame = r.read_pixels().unwrap();
        assert_eq!(frame.pixel_rgba8(35, 5), [0, 255, 0, 255]);
        assert_eq!(frame.pixel_rgba8(5, 5), [0, 0, 0, 255]);
        assert_eq!(frame.pixel_rgba8(35, 35), [0, 0, 0, 255]);
    }

    #[test]
    fn test_texture_orientation() {
        // Top half red, bottom half blue
        let mut data = Vec::new();
        for y in 0..2 {
            for _ in 0..2 {
                data.extend_from_slice(if y == 0 { &[255, 0, 0, 255] } else { &[0, 0, 255, 255] });
            }
        }
        let image = FrameImage::new(2, 2, Arc::from(data), 0);

        let mut r = renderer(8, 8);
        let t = r.generate_texture().unwrap();
        r.upload_texture(t, &image).unwrap();
        r.draw_texture(t, &Mat4::IDENTITY, BlendMode::Replace).unwrap();
        let frame = r.read_pixels().unwrap();
        assert_eq!(frame.pixel_rgba8(4, 1), [255, 0, 0, 255]);
        assert_eq!(frame.pixel_rgba8(4, 6), [0, 0, 255, 255]);
    }

    #[test]
    fn test_alpha_blend() {
        let mut r = renderer(2, 2);
        r.clear([0.0, 0.0, 0.0, 1.0]);
        let t = r.generate_texture().unwrap();
        r.upload_texture(t, &FrameImage::solid(1, 1, [255, 255, 255, 0])).unwrap();
        r.draw_texture(t, &Mat4::IDENTITY, BlendMode::Alpha).unwrap();
        assert_eq!(r.read_pixels().unwrap().pixel_rgba8(0, 0), [0, 0, 0, 255]);

        r.upload_texture(t, &FrameImage::solid(1, 1, [200, 100, 0, 255])).unwrap();
        r.draw_texture(t, &Mat4::IDENTITY, BlendMode::Alpha).unwrap();
        assert_eq!(r.read_pixels().unwrap().pixel_rgba8(0, 0), [200, 100, 0, 255]);
    }

    #[test]
    fn test_unknown_texture() {
        let mut r = renderer(2, 2);
        let result = r.draw_texture(TextureId(99), &Mat4::IDENTITY, BlendMode::Replace);
        assert!(matches!(result, Err(RenderError::TextureNotAttached(_))));
    }

    #[test]
    fn test_extended_range_readback() {
        let mut r = SoftwareRenderer::new();
        r.prepare(Resolution::new(2, 1), PixelLayout::Rgb10a2).unwrap();
        r.clear([1.0, 0.0, 0.0, 1.0]);
        let frame = r.read_pixels().unwrap();
        assert_eq!(frame.layout, PixelLayout::Rgb10a2);
        assert_eq!(frame.pixel_rgba8(1, 0), [255, 0, 0, 255]);
        assert_eq!(frame.to_rgba8().len(), 8);
    }
}
