// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compositing backend
//!
//! Draws are recorded between `clear` and `read_pixels`, then executed in a
//! single render pass into an offscreen texture that is copied back to a
//! mappable buffer.

use super::device::{CachedDimensions, GpuDeviceInfo, LostFlag, create_render_device, read_buffer_async};
use super::{BlendMode, Mat4, PixelLayout, RenderBackend, RenderedFrame, TextureId};
use crate::backends::camera::{FrameImage, Resolution};
use crate::constants::render::padded_bytes_per_row;
use crate::errors::RenderError;
use crate::shaders::{COMPOSITE_SHADER, FRAGMENT_ENTRY, QUAD_VERTICES, VERTEX_ENTRY};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct SourceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dims: CachedDimensions,
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    size: Resolution,
    stride: u32,
    layout: PixelLayout,
    replace_pipeline: wgpu::RenderPipeline,
    alpha_pipeline: wgpu::RenderPipeline,
}

struct Draw {
    bind_group: wgpu::BindGroup,
    blend: BlendMode,
}

pub struct WgpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GpuDeviceInfo,
    lost: LostFlag,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    target: Option<RenderTarget>,
    textures: HashMap<u32, SourceTexture>,
    next_texture: u32,
    clear_color: wgpu::Color,
    draws: Vec<Draw>,
    sequence: u64,
}

impl WgpuRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let (device, queue, info, lost) = pollster::block_on(create_render_device("compositor"))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITE_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("composite sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            info,
            lost,
            shader,
            bind_group_layout,
            pipeline_layout,
            sampler,
            target: None,
            textures: HashMap::new(),
            next_texture: 1,
            clear_color: wgpu::Color::BLACK,
            draws: Vec::new(),
            sequence: 0,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.info.adapter_name
    }

    fn check_lost(&self) -> Result<(), RenderError> {
        if self.lost.is_lost() {
            Err(RenderError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn create_pipeline(&self, format: wgpu::TextureFormat, blend: wgpu::BlendState) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("composite pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some(VERTEX_ENTRY),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(FRAGMENT_ENTRY),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn create_source_texture(&self, width: u32, height: u32) -> SourceTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("camera texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        SourceTexture {
            texture,
            view,
            dims: CachedDimensions::new(width, height),
        }
    }

    fn write_source(&self, source: &SourceTexture, data: &[u8]) {
        let CachedDimensions { width, height } = source.dims;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl RenderBackend for WgpuRenderer {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn prepare(&mut self, size: Resolution, layout: PixelLayout) -> Result<(), RenderError> {
        self.check_lost()?;
        if size.width == 0 || size.height == 0 {
            return Err(RenderError::Fatal(format!("invalid output size {}", size)));
        }

        let format = match layout {
            PixelLayout::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            PixelLayout::Rgb10a2 => wgpu::TextureFormat::Rgb10a2Unorm,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("composite target"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let stride = padded_bytes_per_row(size.width, layout.bytes_per_pixel());
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite readback"),
            size: (stride * size.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let replace_pipeline = self.create_pipeline(format, wgpu::BlendState::REPLACE);
        let alpha_pipeline = self.create_pipeline(format, wgpu::BlendState::ALPHA_BLENDING);

        debug!(
            adapter = %self.info.adapter_name,
            size = %size,
            ?format,
            "Compositor target allocated"
        );

        self.target = Some(RenderTarget {
            texture,
            view,
            readback,
            size,
            stride,
            layout,
            replace_pipeline,
            alpha_pipeline,
        });
        Ok(())
    }

    fn generate_texture(&mut self) -> Result<TextureId, RenderError> {
        self.check_lost()?;
        let source = self.create_source_texture(1, 1);
        self.write_source(&source, &[0, 0, 0, 255]);
        let id = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(id, source);
        Ok(TextureId(id))
    }

    fn upload_texture(&mut self, texture: TextureId, image: &FrameImage) -> Result<(), RenderError> {
        self.check_lost()?;
        if !self.textures.contains_key(&texture.0) {
            return Err(RenderError::TextureNotAttached(format!("texture {}", texture.0)));
        }
        if image.width == 0
            || image.height == 0
            || image.data.len() < (image.width * image.height * 4) as usize
        {
            return Err(RenderError::TransientGlitch(format!(
                "short frame: {} bytes for {}x{}",
                image.data.len(),
                image.width,
                image.height
            )));
        }

        let resize = self
            .textures
            .get(&texture.0)
            .is_some_and(|t| t.dims.needs_update(image.width, image.height));
        if resize {
            let replacement = self.create_source_texture(image.width, image.height);
            self.textures.insert(texture.0, replacement);
        }
        if let Some(source) = self.textures.get(&texture.0) {
            let len = (image.width * image.height * 4) as usize;
            self.write_source(source, &image.data[..len]);
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(source) = self.textures.remove(&texture.0) {
            source.texture.destroy();
        }
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        self.draws.clear();
    }

    fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError> {
        let source = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| RenderError::TextureNotAttached(format!("texture {}", texture.0)))?;

        let uniform = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite transform"),
            size: std::mem::size_of::<Mat4>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&uniform, 0, bytemuck::bytes_of(transform));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.draws.push(Draw { bind_group, blend });
        Ok(())
    }

    fn read_pixels(&mut self) -> Result<RenderedFrame, RenderError> {
        self.check_lost()?;
        let target = self.target.as_ref().ok_or(RenderError::NotPrepared)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("composite encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });

            for draw in &self.draws {
                let pipeline = match draw.blend {
                    BlendMode::Replace => &target.replace_pipeline,
                    BlendMode::Alpha => &target.alpha_pipeline,
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &draw.bind_group, &[]);
                pass.draw(0..QUAD_VERTICES, 0..1);
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.stride),
                    rows_per_image: Some(target.size.height),
                },
            },
            wgpu::Extent3d {
                width: target.size.width,
                height: target.size.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        let data = pollster::block_on(read_buffer_async(&self.device, &target.readback))?;
        self.draws.clear();
        self.check_lost()?;

        self.sequence += 1;
        Ok(RenderedFrame {
            width: target.size.width,
            height: target.size.height,
            stride: target.stride,
            layout: target.layout,
            data: Arc::from(data),
            sequence: self.sequence,
        })
    }

    fn release(&mut self) {
        self.draws.clear();
        for (_, source) in self.textures.drain() {
            source.texture.destroy();
        }
        if let Some(target) = self.target.take() {
            target.texture.destroy();
            target.readback.destroy();
        }
    }
}
