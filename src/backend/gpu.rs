//! Shadow backend drawing depth with wgpu.
//!
//! Object constants live in one uniform buffer at a 256 byte stride and are
//! selected per draw with a dynamic offset. Cutout textures are copied into a
//! single 2D array texture once the shadow target is registered, so every
//! draw shares one bind group. Indirect submission reads one argument record
//! per object; bundle submission replays a bundle recorded once after
//! registration.

use wgpu::util::DeviceExt;

use super::{
    BackendCore, DrawIndexedArgs, MAX_CUTOUT_TEXTURES, OBJECT_CONSTANTS_STRIDE, RenderStats,
    ShadowBackend, TargetExtent, validate_packed_mesh,
};
use crate::{
    context::GpuContext,
    data_structures::{
        instance::ObjectRaw,
        mesh::MeshData,
        texture::{create_cutout_sampler, create_cutout_texture, create_shadow_map},
    },
    light::LightUniform,
    orchestrator::SceneResources,
    pipelines::shadow,
    registrar::MeshBinding,
    scene::ObjectTable,
    settings::SubmissionMode,
};

/// Objects per bundle when direct draws are recorded on several threads.
const MIN_OBJECTS_PER_THREAD: usize = 64;

/// Pack object records at the uniform stride.
fn object_bytes(objects: &[ObjectRaw]) -> Vec<u8> {
    let stride = OBJECT_CONSTANTS_STRIDE as usize;
    let mut bytes = vec![0u8; stride * objects.len().max(1)];
    for (i, object) in objects.iter().enumerate() {
        let raw = bytemuck::bytes_of(object);
        bytes[i * stride..i * stride + raw.len()].copy_from_slice(raw);
    }
    bytes
}

/// Result of a scoped thread, or `fallback` if the thread panicked.
fn join_or_else<T>(handle: std::thread::ScopedJoinHandle<'_, T>, fallback: impl FnOnce() -> T) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(_) => fallback(),
    }
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

/// Everything derived from the registered set: rebuilt when it changes.
struct FrameBindings {
    pipeline: wgpu::RenderPipeline,
    object_buffer: wgpu::Buffer,
    indirect_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    bundle: Option<wgpu::RenderBundle>,
    uploaded_generation: u64,
}

struct GpuResources {
    bind_group_layout: wgpu::BindGroupLayout,
    light_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

impl TargetExtent for wgpu::Texture {
    fn extent(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

pub struct GpuShadowBackend {
    ctx: GpuContext,
    core: BackendCore,
    resources: Option<GpuResources>,
    meshes: Vec<GpuMesh>,
    textures: Vec<wgpu::Texture>,
    target: Option<GpuTarget>,
    bindings: Option<FrameBindings>,
}

impl GpuShadowBackend {
    pub fn new(ctx: GpuContext) -> Self {
        Self {
            ctx,
            core: BackendCore::default(),
            resources: None,
            meshes: Vec::new(),
            textures: Vec::new(),
            target: None,
            bindings: None,
        }
    }

    /// Backend on a freshly created headless device.
    pub fn headless() -> crate::errors::Result<Self> {
        Ok(Self::new(GpuContext::new_blocking()?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn submission_mode(&self) -> SubmissionMode {
        self.core.mode
    }

    pub fn last_stats(&self) -> RenderStats {
        self.core.stats
    }

    /// Drop derived state so the next render rebuilds it.
    fn invalidate(&mut self) {
        self.bindings = None;
    }

    /// Layer every registered cutout into one array texture. Without
    /// cutouts a single white layer keeps the binding valid.
    fn build_cutout_array(&self, encoder: &mut wgpu::CommandEncoder) -> wgpu::Texture {
        let (width, height) = self
            .textures
            .first()
            .map(|t| (t.width(), t.height()))
            .unwrap_or((1, 1));
        let layers = self.textures.len().max(1) as u32;
        let array = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cutout array"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if self.textures.is_empty() {
            self.ctx.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &array,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                &[255, 255, 255, 255],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4),
                    rows_per_image: Some(1),
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
        }

        for (layer, texture) in self.textures.iter().enumerate() {
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &array,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        array
    }

    fn build_bindings(&self, resources: &GpuResources, target: &GpuTarget) -> FrameBindings {
        let device = &self.ctx.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("cutout array encoder"),
        });
        let array = self.build_cutout_array(&mut encoder);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        let array_view = array.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let object_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Object Constants Buffer"),
            contents: &object_bytes(&self.core.objects),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // first_instance stays 0, non-zero needs an optional feature
        let mut args: Vec<DrawIndexedArgs> = self
            .meshes
            .iter()
            .map(|m| DrawIndexedArgs::single(m.index_count))
            .collect();
        if args.is_empty() {
            args.push(DrawIndexedArgs::default());
        }
        let indirect_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Indirect Args Buffer"),
            contents: bytemuck::cast_slice(&args),
            usage: wgpu::BufferUsages::INDIRECT,
        });

        let bind_group = shadow::mk_bind_group(
            device,
            &resources.bind_group_layout,
            &resources.light_buffer,
            &object_buffer,
            &array_view,
            &resources.sampler,
        );
        let pipeline = shadow::mk_render_pipeline(device, &resources.bind_group_layout, target.format);

        log::debug!(
            "shadow bindings rebuilt: {} objects, {} cutout layers",
            self.meshes.len(),
            self.textures.len()
        );
        FrameBindings {
            pipeline,
            object_buffer,
            indirect_buffer,
            bind_group,
            bundle: None,
            uploaded_generation: self.core.generation,
        }
    }

    fn record_bundle(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        bindings: &FrameBindings,
        meshes: &[GpuMesh],
        first_slot: usize,
    ) -> wgpu::RenderBundle {
        let mut encoder = device.create_render_bundle_encoder(&wgpu::RenderBundleEncoderDescriptor {
            label: Some("shadow bundle"),
            color_formats: &[],
            depth_stencil: Some(wgpu::RenderBundleDepthStencil {
                format,
                depth_read_only: false,
                stencil_read_only: true,
            }),
            sample_count: 1,
            ..Default::default()
        });
        encoder.set_pipeline(&bindings.pipeline);
        for (i, mesh) in meshes.iter().enumerate() {
            let offset = ((first_slot + i) as u64 * OBJECT_CONSTANTS_STRIDE) as u32;
            encoder.set_bind_group(0, &bindings.bind_group, &[offset]);
            encoder.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            encoder.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            encoder.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
        encoder.finish(&wgpu::RenderBundleDescriptor {
            label: Some("shadow bundle"),
        })
    }

    /// Direct draws recorded as bundles on scoped threads.
    fn record_parallel(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        bindings: &FrameBindings,
        meshes: &[GpuMesh],
    ) -> Vec<wgpu::RenderBundle> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let chunk = meshes.len().div_ceil(threads).max(MIN_OBJECTS_PER_THREAD);
        std::thread::scope(|scope| {
            let handles: Vec<_> = meshes
                .chunks(chunk)
                .enumerate()
                .map(|(i, meshes)| {
                    let handle =
                        scope.spawn(move || Self::record_bundle(device, format, bindings, meshes, i * chunk));
                    (i, meshes, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(i, meshes, handle)| {
                    join_or_else(handle, || {
                        log::error!(
                            "bundle recording thread for objects {}..{} panicked, recording inline",
                            i * chunk,
                            i * chunk + meshes.len()
                        );
                        Self::record_bundle(device, format, bindings, meshes, i * chunk)
                    })
                })
                .collect()
        })
    }
}

impl ShadowBackend for GpuShadowBackend {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type DepthTarget = wgpu::Texture;

    fn check_device(&mut self) -> bool {
        let limits = self.ctx.device.limits();
        if (limits.min_uniform_buffer_offset_alignment as u64) > OBJECT_CONSTANTS_STRIDE {
            log::error!(
                "uniform offset alignment {} exceeds object stride {}",
                limits.min_uniform_buffer_offset_alignment,
                OBJECT_CONSTANTS_STRIDE
            );
            return false;
        }
        if !self
            .ctx
            .downlevel
            .flags
            .contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION)
        {
            log::error!("adapter {} cannot execute indirect draws", self.ctx.adapter_info.name);
            return false;
        }
        if (limits.max_texture_array_layers as usize) < MAX_CUTOUT_TEXTURES {
            log::error!("adapter supports only {} texture layers", limits.max_texture_array_layers);
            return false;
        }
        true
    }

    fn create_resources(&mut self) -> bool {
        let device = &self.ctx.device;
        let bind_group_layout = shadow::mk_bind_group_layout(device);
        let light_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Light Buffer"),
            contents: bytemuck::cast_slice(&[LightUniform::new(&self.core.light)]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        self.resources = Some(GpuResources {
            bind_group_layout,
            light_buffer,
            sampler: create_cutout_sampler(device),
        });
        self.core.create();
        self.meshes.clear();
        self.textures.clear();
        self.target = None;
        self.invalidate();
        log::info!("GPU shadow backend ready on {}", self.ctx.adapter_info.name);
        true
    }

    fn release_resources(&mut self) {
        if !self.core.release() {
            return;
        }
        self.invalidate();
        self.meshes.clear();
        self.textures.clear();
        self.target = None;
        self.resources = None;
        log::info!("GPU shadow backend released");
    }

    fn send_mesh_data(
        &mut self,
        vertex_buffer: &wgpu::Buffer,
        index_buffer: &wgpu::Buffer,
        vertex_count: u32,
        index_count: u32,
    ) -> bool {
        if !self.core.is_ready("send_mesh_data") {
            return false;
        }
        if let Err(reason) = validate_packed_mesh(vertex_buffer.size(), index_buffer.size(), vertex_count, index_count) {
            log::warn!("rejecting mesh: {}", reason);
            return false;
        }
        if !vertex_buffer.usage().contains(wgpu::BufferUsages::VERTEX)
            || !index_buffer.usage().contains(wgpu::BufferUsages::INDEX)
        {
            log::warn!("rejecting mesh: buffers lack VERTEX/INDEX usage");
            return false;
        }
        self.core.push_object();
        self.meshes.push(GpuMesh {
            vertex_buffer: vertex_buffer.clone(),
            index_buffer: index_buffer.clone(),
            index_count,
        });
        self.invalidate();
        true
    }

    fn send_texture_data(&mut self, texture: &wgpu::Texture) -> bool {
        if !self.core.is_ready("send_texture_data") {
            return false;
        }
        if self.core.has_target {
            log::warn!("rejecting texture: shadow target already registered");
            return false;
        }
        if self.textures.len() >= MAX_CUTOUT_TEXTURES {
            log::warn!("rejecting texture: limit of {} reached", MAX_CUTOUT_TEXTURES);
            return false;
        }
        if texture.format() != wgpu::TextureFormat::Rgba8Unorm
            || !texture.usage().contains(wgpu::TextureUsages::COPY_SRC)
        {
            log::warn!("rejecting texture: need Rgba8Unorm with COPY_SRC, got {:?}", texture.format());
            return false;
        }
        if let Some(first) = self.textures.first()
            && first.size() != texture.size()
        {
            log::warn!(
                "rejecting texture: {:?} differs from the first cutout {:?}",
                texture.size(),
                first.size()
            );
            return false;
        }
        self.textures.push(texture.clone());
        self.core.texture_count = self.textures.len();
        self.invalidate();
        true
    }

    fn send_shadow_texture_data(&mut self, target: &wgpu::Texture) -> bool {
        if !self.core.is_ready("send_shadow_texture_data") {
            return false;
        }
        let format = target.format();
        if !format.has_depth_aspect() || !target.usage().contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            log::warn!("rejecting shadow target: {:?} is not a depth attachment", format);
            return false;
        }
        let view = target.create_view(&wgpu::TextureViewDescriptor {
            label: Some("shadow target view"),
            format: Some(format),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::DepthOnly,
            ..Default::default()
        });
        log::info!("shadow target {}x{} {:?}", target.width(), target.height(), format);
        self.target = Some(GpuTarget {
            texture: target.clone(),
            view,
            format,
        });
        self.core.has_target = true;
        self.invalidate();
        true
    }

    fn set_object_transform(&mut self, index: u32, position: [f32; 3], scale: [f32; 3], rotation: [f32; 4]) {
        self.core.set_transform(index, position, scale, rotation);
    }

    fn set_obj_texture_index(&mut self, index: u32, texture_index: i32) {
        self.core.set_texture_index(index, texture_index);
    }

    fn set_light_transform(&mut self, position: [f32; 3], direction: [f32; 3], radius: f32) {
        self.core.set_light(position, direction, radius);
    }

    fn get_light_transform(&self, out: &mut [f32; 16]) {
        self.core.get_light(out);
    }

    fn set_render_method(&mut self, use_indirect: bool, use_bundle: bool) {
        self.core.set_mode(use_indirect, use_bundle);
    }

    fn render_shadows(&mut self, multi_threaded: bool) {
        if !self.core.is_ready("render_shadows") {
            return;
        }
        let (Some(resources), Some(target)) = (&self.resources, &self.target) else {
            log::warn!("render_shadows without a shadow target");
            return;
        };
        let start = instant::Instant::now();

        if self.bindings.is_none() {
            self.bindings = Some(self.build_bindings(resources, target));
        }
        let Some(bindings) = self.bindings.as_mut() else {
            return;
        };

        let queue = &self.ctx.queue;
        queue.write_buffer(
            &resources.light_buffer,
            0,
            bytemuck::cast_slice(&[LightUniform::new(&self.core.light)]),
        );
        if bindings.uploaded_generation != self.core.generation {
            queue.write_buffer(&bindings.object_buffer, 0, &object_bytes(&self.core.objects));
            bindings.uploaded_generation = self.core.generation;
        }

        let mode = self.core.mode;
        if mode == SubmissionMode::Bundle && bindings.bundle.is_none() {
            log::debug!("recording shadow bundle of {} draws", self.meshes.len());
            bindings.bundle = Some(Self::record_bundle(
                &self.ctx.device,
                target.format,
                bindings,
                &self.meshes,
                0,
            ));
        }
        let bindings = &*bindings;
        let parallel = if mode == SubmissionMode::Direct && multi_threaded && !self.meshes.is_empty() {
            Self::record_parallel(&self.ctx.device, target.format, bindings, &self.meshes)
        } else {
            Vec::new()
        };

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Shadow Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Depth Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            match mode {
                SubmissionMode::Bundle => {
                    pass.execute_bundles(bindings.bundle.iter());
                }
                SubmissionMode::Direct if !parallel.is_empty() => {
                    pass.execute_bundles(parallel.iter());
                }
                SubmissionMode::Direct => {
                    pass.set_pipeline(&bindings.pipeline);
                    for (i, mesh) in self.meshes.iter().enumerate() {
                        pass.set_bind_group(0, &bindings.bind_group, &[(i as u64 * OBJECT_CONSTANTS_STRIDE) as u32]);
                        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                }
                SubmissionMode::Indirect => {
                    pass.set_pipeline(&bindings.pipeline);
                    for (i, mesh) in self.meshes.iter().enumerate() {
                        pass.set_bind_group(0, &bindings.bind_group, &[(i as u64 * OBJECT_CONSTANTS_STRIDE) as u32]);
                        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed_indirect(&bindings.indirect_buffer, i as u64 * DrawIndexedArgs::SIZE);
                    }
                }
            }
        }
        let submission = queue.submit(std::iter::once(encoder.finish()));
        if let Err(e) = self.ctx.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        }) {
            log::warn!("shadow pass poll failed: {:?}", e);
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let triangles = self.meshes.iter().map(|m| (m.index_count / 3) as u64).sum();
        self.core.stats = RenderStats {
            mode,
            multi_threaded,
            draws: self.meshes.len() as u32,
            triangles,
            elapsed_ms,
        };
        log::debug!(
            "gpu shadow pass: {:?}, {} draws, {:.3} ms",
            mode,
            self.meshes.len(),
            elapsed_ms
        );
    }

    fn get_shadow_render_time(&self) -> f64 {
        self.core.stats.elapsed_ms
    }
}

impl GpuShadowBackend {
    /// The registered depth texture, for readback.
    pub fn shadow_target(&self) -> Option<&wgpu::Texture> {
        self.target.as_ref().map(|t| &t.texture)
    }

    /// Upload meshes and cutouts and create a square shadow map on this
    /// backend's device.
    pub fn scene_resources(
        &self,
        meshes: &[MeshData],
        cutouts: &[image::RgbaImage],
        objects: ObjectTable,
        shadow_map_size: u32,
    ) -> SceneResources<Self> {
        let device = &self.ctx.device;
        let meshes = meshes
            .iter()
            .map(|mesh| {
                let (vb, ib) = mesh.upload(device);
                MeshBinding::new(&mesh.name, vb, ib, mesh.vertex_count(), mesh.index_count())
            })
            .collect();
        let textures = cutouts
            .iter()
            .enumerate()
            .map(|(i, img)| {
                create_cutout_texture(device, &self.ctx.queue, img, &format!("cutout {}", i))
            })
            .collect();
        let shadow_target = create_shadow_map(device, shadow_map_size, "shadow map");
        SceneResources {
            meshes,
            textures,
            shadow_target,
            objects,
        }
    }
}
