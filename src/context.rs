use std::time::Duration;

use anyhow::{Context as _, anyhow};

/// Headless GPU device and queue the wgpu shadow backend draws with.
///
/// The shadow pass never presents, so no surface is requested.
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub downlevel: wgpu::DownlevelCapabilities,
}

impl GpuContext {
    pub async fn new() -> anyhow::Result<Self> {
        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("no suitable GPU adapter")?;
        let adapter_info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        log::info!("adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("shadow device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .context("failed to request device")?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            downlevel,
        })
    }

    /// [`GpuContext::new`] driven to completion on the calling thread.
    pub fn new_blocking() -> anyhow::Result<Self> {
        futures::executor::block_on(Self::new())
    }

    /// Read a `Depth32Float` texture back into rows of floats.
    pub fn read_depth(&self, texture: &wgpu::Texture) -> anyhow::Result<Vec<f32>> {
        let (width, height) = (texture.width(), texture.height());
        let u32_size = std::mem::size_of::<f32>() as u32;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = (u32_size * width).div_ceil(align) * align;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("depth readback"),
            size: (padded_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("depth readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::DepthOnly,
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            texture.size(),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        let buffer_slice = output_buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|e| anyhow!("device poll failed: {:?}", e))?;
        futures::executor::block_on(rx.receive())
            .ok_or_else(|| anyhow!("readback channel closed"))??;

        let mut depth = Vec::with_capacity((width * height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(padded_row as usize).take(height as usize) {
                let row = &row[..(u32_size * width) as usize];
                depth.extend(row.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>));
            }
        }
        output_buffer.unmap();
        Ok(depth)
    }
}
