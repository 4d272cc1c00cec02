use anyhow::{ensure, Context, Result};
use wgpu;

use super::pipeline::{BarPipeline, BarUniforms, GpuRect};
use super::{BarRect, Surface};
use crate::encode::FrameOutput;

pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const MIN_RECT_CAPACITY: usize = 64;

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    output_buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    unpadded_bytes_per_row: u32,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("bar_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (unpadded_bytes_per_row + align - 1) / align * align;

        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bar_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            output_buffer,
            width,
            height,
            padded_bytes_per_row,
            unpadded_bytes_per_row,
        }
    }
}

/// Offscreen wgpu surface. Bars are drawn as instanced quads and the result
/// is read back to RGBA for the optional [`FrameOutput`].
pub struct GpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: BarPipeline,
    target: RenderTarget,
    uniform_buffer: wgpu::Buffer,
    rect_buffer: wgpu::Buffer,
    rect_capacity: usize,
    bind_group: wgpu::BindGroup,
    rects: Vec<GpuRect>,
    background: wgpu::Color,
    output: Option<Box<dyn FrameOutput>>,
    pixels: Vec<u8>,
}

impl GpuSurface {
    pub fn new(width: u32, height: u32, bar_color: [u8; 3], background: [u8; 3]) -> Result<Self> {
        ensure!(width > 0 && height > 0, "Surface size must be non-zero, got {}x{}", width, height);

        let (device, queue) = pollster::block_on(open_device())?;
        let pipeline = BarPipeline::new(&device, TEXTURE_FORMAT)?;
        let target = RenderTarget::new(&device, width, height);

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bar_uniforms"),
            size: std::mem::size_of::<BarUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniforms = BarUniforms::from_rgb(bar_color);
        queue.write_buffer(&uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let rect_buffer = create_rect_buffer(&device, MIN_RECT_CAPACITY);
        let bind_group = create_bind_group(&device, &pipeline, &uniform_buffer, &rect_buffer);

        Ok(Self {
            device,
            queue,
            pipeline,
            target,
            uniform_buffer,
            rect_buffer,
            rect_capacity: MIN_RECT_CAPACITY,
            bind_group,
            rects: Vec::with_capacity(MIN_RECT_CAPACITY),
            background: wgpu::Color {
                r: background[0] as f64 / 255.0,
                g: background[1] as f64 / 255.0,
                b: background[2] as f64 / 255.0,
                a: 1.0,
            },
            output: None,
            pixels: Vec::new(),
        })
    }

    pub fn with_output(mut self, output: Box<dyn FrameOutput>) -> Self {
        self.output = Some(output);
        self
    }

    fn ensure_rect_capacity(&mut self, needed: usize) {
        if needed <= self.rect_capacity {
            return;
        }
        let capacity = needed.next_power_of_two();
        log::debug!("Growing bar buffer to {} rects", capacity);
        self.rect_buffer = create_rect_buffer(&self.device, capacity);
        self.rect_capacity = capacity;
        self.bind_group = create_bind_group(
            &self.device,
            &self.pipeline,
            &self.uniform_buffer,
            &self.rect_buffer,
        );
    }

    fn render_and_readback(&mut self) -> Result<()> {
        let rect_count = self.rects.len();
        self.ensure_rect_capacity(rect_count);
        if rect_count > 0 {
            self.queue
                .write_buffer(&self.rect_buffer, 0, bytemuck::cast_slice(&self.rects));
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("bar_encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("bar_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.background),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if rect_count > 0 {
                render_pass.set_pipeline(&self.pipeline.pipeline);
                render_pass.set_bind_group(0, &self.bind_group, &[]);
                render_pass.draw(0..6, 0..rect_count as u32);
            }
        }

        let target = &self.target;
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = target.output_buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver.recv()??;

        let data = buffer_slice.get_mapped_range();

        // Strip row padding
        self.pixels.clear();
        self.pixels
            .reserve((target.unpadded_bytes_per_row * target.height) as usize);
        for row in 0..target.height {
            let start = (row * target.padded_bytes_per_row) as usize;
            let end = start + target.unpadded_bytes_per_row as usize;
            self.pixels.extend_from_slice(&data[start..end]);
        }

        drop(data);
        target.output_buffer.unmap();
        Ok(())
    }
}

impl Surface for GpuSurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        ensure!(width > 0 && height > 0, "Surface size must be non-zero, got {}x{}", width, height);
        self.target = RenderTarget::new(&self.device, width, height);
        Ok(())
    }

    fn clear(&mut self) {
        self.rects.clear();
    }

    fn fill_rect(&mut self, rect: BarRect) {
        self.rects.push(GpuRect {
            x0: rect.x0,
            y0: rect.y0,
            x1: rect.x1,
            y1: rect.y1,
        });
    }

    fn present(&mut self) -> Result<()> {
        self.render_and_readback()?;
        if let Some(output) = self.output.as_mut() {
            output.write_frame(&self.pixels, self.target.width, self.target.height)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self.output.as_mut() {
            Some(output) => output.finish(),
            None => Ok(()),
        }
    }
}

/// Headless device; bars need nothing beyond downlevel limits, so the
/// low-power adapter is preferred.
async fn open_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .context("No GPU adapter available for the bar surface")?;

    let info = adapter.get_info();
    log::info!("Bar surface on {} ({:?})", info.name, info.backend);

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("nowbar_bars"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                ..Default::default()
            },
            None,
        )
        .await
        .context("Failed to open GPU device for the bar surface")
}

fn create_rect_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("bar_rects"),
        size: (capacity * std::mem::size_of::<GpuRect>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    pipeline: &BarPipeline,
    uniform_buffer: &wgpu::Buffer,
    rect_buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("bar_bind_group"),
        layout: &pipeline.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: rect_buffer.as_entire_binding(),
            },
        ],
    })
}
