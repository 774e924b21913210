//! Reference backend rasterizing depth on the CPU.
//!
//! Handles are reference counted so the caller and the backend can share them:
//! [`CpuBuffer`] wraps raw bytes laid out like the GPU buffers, [`CpuTexture`]
//! an RGBA8 image and [`CpuDepthTarget`] a depth map behind a lock the caller
//! reads after rendering.
//!
//! Depth is cleared to 1.0 and the nearest fragment wins. Cutout objects sample
//! alpha with nearest filtering and wrap addressing and discard below 0.5.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    BackendCore, DrawIndexedArgs, MAX_CUTOUT_TEXTURES, RenderStats, ShadowBackend, TargetExtent,
    validate_mesh,
};
use crate::{
    data_structures::mesh::MeshData, orchestrator::SceneResources, registrar::MeshBinding,
    scene::ObjectTable, settings::SubmissionMode,
};

/// Cutout alpha threshold in 8 bit.
const ALPHA_CUTOFF: u8 = 128;

/// Offset of the uv pair in a vertex, after position and normal.
const UV_OFFSET: usize = 24;

/// Texel centers this close outside an edge still count as covered, so shared
/// edges never leave gaps.
const EDGE_EPSILON: f32 = 1e-5;

/// Immutable shared byte buffer.
#[derive(Clone, Debug)]
pub struct CpuBuffer {
    bytes: Arc<[u8]>,
}

impl CpuBuffer {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn from_pod<T: bytemuck::Pod>(data: &[T]) -> Self {
        Self::from_bytes(bytemuck::cast_slice(data))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of handles currently sharing the allocation.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

/// Shared RGBA8 cutout texture.
#[derive(Clone, Debug)]
pub struct CpuTexture {
    image: Arc<image::RgbaImage>,
}

impl CpuTexture {
    pub fn from_image(image: image::RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Decode PNG or JPEG data. `format` is an optional extension hint.
    pub fn decode(bytes: &[u8], format: Option<&str>) -> anyhow::Result<Self> {
        let image = crate::data_structures::texture::decode_rgba(bytes, format)?;
        Ok(Self::from_image(image))
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_image(image::RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &image::RgbaImage {
        &self.image
    }

    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.image)
    }

    /// Nearest sample with wrap addressing.
    pub fn alpha_at(&self, u: f32, v: f32) -> u8 {
        let (w, h) = self.image.dimensions();
        let fu = u - u.floor();
        let fv = v - v.floor();
        let x = ((fu * w as f32) as u32).min(w - 1);
        let y = ((fv * h as f32) as u32).min(h - 1);
        self.image.get_pixel(x, y).0[3]
    }
}

#[derive(Debug)]
pub struct DepthMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

/// Depth map shared between the caller and the backend.
#[derive(Clone, Debug)]
pub struct CpuDepthTarget {
    map: Arc<RwLock<DepthMap>>,
}

impl CpuDepthTarget {
    /// Square target, like the shadow maps the system creates.
    pub fn new(size: u32) -> Self {
        Self::with_dimensions(size, size)
    }

    pub fn with_dimensions(width: u32, height: u32) -> Self {
        let (width, height) = (width as usize, height as usize);
        Self {
            map: Arc::new(RwLock::new(DepthMap {
                width,
                height,
                data: vec![1.0; width * height],
            })),
        }
    }

    pub fn width(&self) -> usize {
        self.map.read().width
    }

    pub fn height(&self) -> usize {
        self.map.read().height
    }

    pub fn depth_at(&self, x: usize, y: usize) -> Option<f32> {
        let map = self.map.read();
        if x >= map.width || y >= map.height {
            return None;
        }
        Some(map.data[y * map.width + x])
    }

    /// Copy of the current depth values, row by row.
    pub fn snapshot(&self) -> Vec<f32> {
        self.map.read().data.clone()
    }

    /// Number of texels closer than the cleared far plane.
    pub fn covered_texels(&self) -> usize {
        self.map.read().data.iter().filter(|d| **d < 1.0).count()
    }

    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.map)
    }
}

impl TargetExtent for CpuDepthTarget {
    fn extent(&self) -> (u32, u32) {
        let map = self.map.read();
        (map.width as u32, map.height as u32)
    }
}

struct CpuMesh {
    vertices: CpuBuffer,
    indices: CpuBuffer,
    stride: usize,
    vertex_count: u32,
    index_count: u32,
}

/// One draw: which object and which range of its mesh.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Draw {
    slot: usize,
    index_count: u32,
    first_index: u32,
    base_vertex: i32,
}

impl Draw {
    fn from_args(args: &DrawIndexedArgs) -> Self {
        Self {
            slot: args.first_instance as usize,
            index_count: args.index_count,
            first_index: args.first_index,
            base_vertex: args.base_vertex,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    u: f32,
    v: f32,
}

struct ScreenTriangle {
    v: [ScreenVertex; 3],
    cutout: Option<usize>,
}

#[derive(Default)]
pub struct CpuShadowBackend {
    core: BackendCore,
    meshes: Vec<CpuMesh>,
    textures: Vec<CpuTexture>,
    target: Option<CpuDepthTarget>,
    indirect_args: Vec<DrawIndexedArgs>,
    bundle: Option<Vec<Draw>>,
    threads: Option<usize>,
}

impl CpuShadowBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the number of bands used by multithreaded renders.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Share meshes and cutouts as CPU handles and create a square depth map.
    pub fn scene_resources(
        meshes: &[MeshData],
        cutouts: &[image::RgbaImage],
        objects: ObjectTable,
        shadow_map_size: u32,
    ) -> SceneResources<Self> {
        let meshes = meshes
            .iter()
            .map(|mesh| {
                let (vb, ib) = mesh.to_cpu_buffers();
                MeshBinding::new(&mesh.name, vb, ib, mesh.vertex_count(), mesh.index_count())
            })
            .collect();
        SceneResources {
            meshes,
            textures: cutouts.iter().cloned().map(CpuTexture::from_image).collect(),
            shadow_target: CpuDepthTarget::new(shadow_map_size),
            objects,
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn submission_mode(&self) -> SubmissionMode {
        self.core.mode
    }

    pub fn last_stats(&self) -> RenderStats {
        self.core.stats
    }

    /// Texture index an object ended up with, after range checks.
    pub fn object_texture_index(&self, index: u32) -> Option<i32> {
        self.core.objects.get(index as usize).map(|o| o.texture_index)
    }

    pub fn object_model(&self, index: u32) -> Option<cgmath::Matrix4<f32>> {
        self.core.objects.get(index as usize).map(|o| o.model_matrix())
    }

    fn band_count(&self, height: usize) -> usize {
        let threads = self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        threads.clamp(1, height.max(1))
    }

    fn direct_draws(&self) -> Vec<Draw> {
        self.meshes
            .iter()
            .enumerate()
            .map(|(slot, mesh)| Draw {
                slot,
                index_count: mesh.index_count,
                first_index: 0,
                base_vertex: 0,
            })
            .collect()
    }

    /// Transform every drawn triangle into screen space.
    fn prepare(&self, draws: &[Draw], width: usize, height: usize) -> Vec<ScreenTriangle> {
        let light = self.core.light.as_matrix();
        let (w, h) = (width as f32, height as f32);
        let mut triangles = Vec::new();

        for draw in draws {
            let (Some(mesh), Some(object)) = (self.meshes.get(draw.slot), self.core.objects.get(draw.slot))
            else {
                continue;
            };
            let mvp = light * object.model_matrix();
            let cutout = self.core.cutout_of(object);
            let vertices = mesh.vertices.as_bytes();
            let indices: Vec<u32> = mesh
                .indices
                .as_bytes()
                .chunks_exact(4)
                .skip(draw.first_index as usize)
                .take(draw.index_count as usize)
                .map(|c| bytemuck::pod_read_unaligned::<u32>(c))
                .collect();

            let vertex = |i: u32| -> Option<ScreenVertex> {
                let i = i as i64 + draw.base_vertex as i64;
                if i < 0 || i >= mesh.vertex_count as i64 {
                    return None;
                }
                let o = i as usize * mesh.stride;
                let p: [f32; 3] = bytemuck::pod_read_unaligned(&vertices[o..o + 12]);
                let uv: [f32; 2] = bytemuck::pod_read_unaligned(&vertices[o + UV_OFFSET..o + UV_OFFSET + 8]);
                let clip = mvp * cgmath::Vector4::new(p[0], p[1], p[2], 1.0);
                let ndc = [clip.x / clip.w, clip.y / clip.w, clip.z / clip.w];
                Some(ScreenVertex {
                    x: (ndc[0] * 0.5 + 0.5) * w,
                    y: (0.5 - ndc[1] * 0.5) * h,
                    z: ndc[2],
                    u: uv[0],
                    v: uv[1],
                })
            };

            for tri in indices.chunks_exact(3) {
                let (Some(a), Some(b), Some(c)) = (vertex(tri[0]), vertex(tri[1]), vertex(tri[2])) else {
                    continue;
                };
                triangles.push(ScreenTriangle { v: [a, b, c], cutout });
            }
        }
        triangles
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Rasterize all triangles into the rows `row0..row0 + band.len() / width`.
fn rasterize_band(
    triangles: &[ScreenTriangle],
    textures: &[CpuTexture],
    width: usize,
    row0: usize,
    band: &mut [f32],
) {
    let rows = band.len() / width;
    for tri in triangles {
        let [a, b, c] = &tri.v;
        let area = edge(a, b, c.x, c.y);
        if !area.is_finite() || area.abs() < f32::EPSILON {
            continue;
        }

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as usize;
        let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.0) as usize).min(width);
        let min_y = (a.y.min(b.y).min(c.y).floor().max(0.0) as usize).max(row0);
        let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.0) as usize).min(row0 + rows);

        for y in min_y..max_y {
            let py = y as f32 + 0.5;
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let w0 = edge(b, c, px, py) / area;
                let w1 = edge(c, a, px, py) / area;
                let w2 = edge(a, b, px, py) / area;
                if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
                    continue;
                }

                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }

                let texel = &mut band[(y - row0) * width + x];
                if z > *texel {
                    continue;
                }

                if let Some(t) = tri.cutout.and_then(|t| textures.get(t)) {
                    let u = w0 * a.u + w1 * b.u + w2 * c.u;
                    let v = w0 * a.v + w1 * b.v + w2 * c.v;
                    if t.alpha_at(u, v) < ALPHA_CUTOFF {
                        continue;
                    }
                }
                *texel = z;
            }
        }
    }
}

impl ShadowBackend for CpuShadowBackend {
    type Buffer = CpuBuffer;
    type Texture = CpuTexture;
    type DepthTarget = CpuDepthTarget;

    fn check_device(&mut self) -> bool {
        true
    }

    fn create_resources(&mut self) -> bool {
        self.core.create();
        self.meshes.clear();
        self.textures.clear();
        self.target = None;
        self.indirect_args.clear();
        self.bundle = None;
        log::info!("CPU shadow backend ready");
        true
    }

    fn release_resources(&mut self) {
        if !self.core.release() {
            return;
        }
        self.meshes.clear();
        self.textures.clear();
        self.target = None;
        self.indirect_args.clear();
        self.bundle = None;
        log::info!("CPU shadow backend released");
    }

    fn send_mesh_data(
        &mut self,
        vertex_buffer: &CpuBuffer,
        index_buffer: &CpuBuffer,
        vertex_count: u32,
        index_count: u32,
    ) -> bool {
        if !self.core.is_ready("send_mesh_data") {
            return false;
        }
        let stride = match validate_mesh(
            vertex_buffer.len() as u64,
            index_buffer.len() as u64,
            vertex_count,
            index_count,
        ) {
            Ok(stride) => stride as usize,
            Err(reason) => {
                log::warn!("rejecting mesh: {}", reason);
                return false;
            }
        };

        let slot = self.core.push_object();
        self.meshes.push(CpuMesh {
            vertices: vertex_buffer.clone(),
            indices: index_buffer.clone(),
            stride,
            vertex_count,
            index_count,
        });
        self.indirect_args.push(DrawIndexedArgs {
            first_instance: slot as u32,
            ..DrawIndexedArgs::single(index_count)
        });
        self.bundle = None;
        true
    }

    fn send_texture_data(&mut self, texture: &CpuTexture) -> bool {
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
        if texture.width() == 0 || texture.height() == 0 {
            log::warn!("rejecting empty texture");
            return false;
        }
        self.textures.push(texture.clone());
        self.core.texture_count = self.textures.len();
        self.bundle = None;
        true
    }

    fn send_shadow_texture_data(&mut self, target: &CpuDepthTarget) -> bool {
        if !self.core.is_ready("send_shadow_texture_data") {
            return false;
        }
        let (width, height) = (target.width(), target.height());
        if width == 0 || height == 0 {
            log::warn!("rejecting {}x{} shadow target", width, height);
            return false;
        }
        self.target = Some(target.clone());
        self.core.has_target = true;
        self.bundle = None;
        log::info!("shadow target {}x{}", width, height);
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
        let Some(target) = self.target.clone() else {
            log::warn!("render_shadows without a shadow target");
            return;
        };
        let start = instant::Instant::now();

        let draws = match self.core.mode {
            SubmissionMode::Direct => self.direct_draws(),
            SubmissionMode::Indirect => self.indirect_args.iter().map(Draw::from_args).collect(),
            SubmissionMode::Bundle => {
                if self.bundle.is_none() {
                    log::debug!("recording bundle of {} draws", self.meshes.len());
                    self.bundle = Some(self.direct_draws());
                }
                self.bundle.clone().unwrap_or_default()
            }
        };

        let mut map = target.map.write();
        let DepthMap { width, height, data } = &mut *map;
        let (width, height) = (*width, *height);
        let triangles = self.prepare(&draws, width, height);
        data.fill(1.0);

        let textures = &self.textures;
        if multi_threaded {
            let bands = self.band_count(height);
            let rows_per_band = height.div_ceil(bands);
            std::thread::scope(|scope| {
                for (i, band) in data.chunks_mut(rows_per_band * width).enumerate() {
                    let triangles = &triangles;
                    scope.spawn(move || {
                        rasterize_band(triangles, textures, width, i * rows_per_band, band)
                    });
                }
            });
        } else {
            rasterize_band(&triangles, textures, width, 0, data);
        }
        drop(map);

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.core.stats = RenderStats {
            mode: self.core.mode,
            multi_threaded,
            draws: draws.len() as u32,
            triangles: triangles.len() as u64,
            elapsed_ms,
        };
        log::debug!(
            "cpu shadow pass: {} draws, {} triangles, {:.3} ms",
            draws.len(),
            triangles.len(),
            elapsed_ms
        );
    }

    fn get_shadow_render_time(&self) -> f64 {
        self.core.stats.elapsed_ms
    }
}
