//! The backend boundary.
//!
//! [`ShadowBackend`] is the fixed set of entry points the shadow system drives.
//! Every method reports failure as a `bool` or by logging; nothing panics or
//! returns an error across this boundary.
//!
//! - `cpu` is a reference rasterizer working on byte buffers and RGBA images
//! - `gpu` draws depth with wgpu on a headless device

pub mod cpu;
pub mod gpu;

use crate::{
    data_structures::instance::{ObjectRaw, ObjectTransform},
    light::{ShadowTransform, fit_shadow_transform},
    scene::TextureSlot,
    settings::SubmissionMode,
};

/// Upper bound on registered cutout textures.
pub const MAX_CUTOUT_TEXTURES: usize = 16;

/// Stride of one object's constants in the per-object uniform buffer.
pub const OBJECT_CONSTANTS_STRIDE: u64 = 256;

/// Size of a depth target in texels.
pub trait TargetExtent {
    fn extent(&self) -> (u32, u32);
}

/// Entry points of a shadow rendering backend.
///
/// Handles are shared with the caller; the backend keeps its own clones until
/// [`ShadowBackend::release_resources`].
pub trait ShadowBackend {
    type Buffer: Clone;
    type Texture: Clone;
    type DepthTarget: Clone + TargetExtent;

    /// Capability probe, called once at startup.
    fn check_device(&mut self) -> bool;
    /// Allocate internal state. Must precede every other call but the probe.
    fn create_resources(&mut self) -> bool;
    /// Drop every registered handle. A second call is a logged no-op.
    fn release_resources(&mut self);

    /// Register one mesh. On success it occupies the next backend slot.
    fn send_mesh_data(
        &mut self,
        vertex_buffer: &Self::Buffer,
        index_buffer: &Self::Buffer,
        vertex_count: u32,
        index_count: u32,
    ) -> bool;
    fn send_texture_data(&mut self, texture: &Self::Texture) -> bool;
    fn send_shadow_texture_data(&mut self, target: &Self::DepthTarget) -> bool;

    /// `rotation` is a unit quaternion in `(x, y, z, w)` order.
    fn set_object_transform(
        &mut self,
        index: u32,
        position: [f32; 3],
        scale: [f32; 3],
        rotation: [f32; 4],
    );
    /// `-1` marks the object opaque.
    fn set_obj_texture_index(&mut self, index: u32, texture_index: i32);

    fn set_light_transform(&mut self, position: [f32; 3], direction: [f32; 3], radius: f32);
    /// Copy the current shadow transform, row-major, into `out`.
    fn get_light_transform(&self, out: &mut [f32; 16]);

    fn set_render_method(&mut self, use_indirect: bool, use_bundle: bool);
    /// Draw every registered object into the shadow target. Synchronous.
    fn render_shadows(&mut self, multi_threaded: bool);
    /// Duration of the last [`ShadowBackend::render_shadows`] in milliseconds.
    fn get_shadow_render_time(&self) -> f64;
}

/// Arguments of one indexed draw, laid out as the GPU reads them.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedArgs {
    pub const SIZE: u64 = std::mem::size_of::<DrawIndexedArgs>() as u64;

    pub fn single(index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 1,
            ..Default::default()
        }
    }
}

/// What the last render did.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RenderStats {
    pub mode: SubmissionMode,
    pub multi_threaded: bool,
    pub draws: u32,
    pub triangles: u64,
    pub elapsed_ms: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub(crate) enum Lifecycle {
    #[default]
    Uninitialized,
    Ready,
    Released,
}

/// Backend-independent state both backends keep: lifecycle, per-object
/// constants, light and submission mode.
#[derive(Debug, Default)]
pub(crate) struct BackendCore {
    pub lifecycle: Lifecycle,
    pub objects: Vec<ObjectRaw>,
    pub texture_count: usize,
    pub has_target: bool,
    pub light: ShadowTransform,
    pub mode: SubmissionMode,
    pub stats: RenderStats,
    /// Bumped whenever the set of draws or their constants changes.
    pub generation: u64,
}

impl BackendCore {
    pub fn is_ready(&self, call: &str) -> bool {
        match self.lifecycle {
            Lifecycle::Ready => true,
            Lifecycle::Uninitialized => {
                log::warn!("{} called before create_resources", call);
                false
            }
            Lifecycle::Released => {
                log::warn!("{} called after release_resources", call);
                false
            }
        }
    }

    pub fn create(&mut self) {
        self.lifecycle = Lifecycle::Ready;
        self.objects.clear();
        self.texture_count = 0;
        self.has_target = false;
        self.light = ShadowTransform::identity();
        self.mode = SubmissionMode::default();
        self.stats = RenderStats::default();
        self.generation += 1;
    }

    /// Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Released {
            log::warn!("release_resources called twice, ignoring");
            return false;
        }
        self.lifecycle = Lifecycle::Released;
        self.objects.clear();
        self.texture_count = 0;
        self.has_target = false;
        self.generation += 1;
        true
    }

    /// Reserve constants for a newly registered mesh, returning its slot.
    pub fn push_object(&mut self) -> usize {
        self.objects.push(ObjectRaw::default());
        self.generation += 1;
        self.objects.len() - 1
    }

    pub fn set_transform(&mut self, index: u32, position: [f32; 3], scale: [f32; 3], rotation: [f32; 4]) {
        if !self.is_ready("set_object_transform") {
            return;
        }
        let Some(object) = self.objects.get_mut(index as usize) else {
            log::error!(
                "set_object_transform: index {} out of range ({} objects)",
                index,
                self.objects.len()
            );
            return;
        };
        let texture_index = object.texture_index;
        *object = ObjectTransform::from_arrays(position, scale, rotation).to_raw(texture_index);
        self.generation += 1;
    }

    pub fn set_texture_index(&mut self, index: u32, texture_index: i32) {
        if !self.is_ready("set_obj_texture_index") {
            return;
        }
        let texture_count = self.texture_count;
        let Some(object) = self.objects.get_mut(index as usize) else {
            log::error!(
                "set_obj_texture_index: index {} out of range ({} objects)",
                index,
                self.objects.len()
            );
            return;
        };
        let slot = match TextureSlot::from_raw(texture_index) {
            TextureSlot::Cutout(t) if t as usize >= texture_count => {
                log::warn!(
                    "object {}: texture index {} out of range ({} textures), drawing opaque",
                    index,
                    texture_index,
                    texture_count
                );
                TextureSlot::Opaque
            }
            slot => slot,
        };
        object.texture_index = slot.to_raw();
        self.generation += 1;
    }

    pub fn set_light(&mut self, position: [f32; 3], direction: [f32; 3], radius: f32) {
        if !self.is_ready("set_light_transform") {
            return;
        }
        self.light.store(&fit_shadow_transform(position, direction, radius));
    }

    pub fn get_light(&self, out: &mut [f32; 16]) {
        out.copy_from_slice(self.light.as_array());
    }

    pub fn set_mode(&mut self, use_indirect: bool, use_bundle: bool) {
        let mode = SubmissionMode::from_flags(use_indirect, use_bundle);
        if mode != self.mode {
            log::debug!("submission mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    /// Texture array slot of an object, if it is cut out.
    pub fn cutout_of(&self, object: &ObjectRaw) -> Option<usize> {
        match TextureSlot::from_raw(object.texture_index) {
            TextureSlot::Cutout(t) if (t as usize) < self.texture_count => Some(t as usize),
            _ => None,
        }
    }
}

/// Check counts and sizes of a mesh's buffers before registering it.
///
/// The vertex stride is derived from the buffer size and must hold at least one
/// [`crate::data_structures::mesh::ShadowVertex`].
pub(crate) fn validate_mesh(
    vertex_bytes: u64,
    index_bytes: u64,
    vertex_count: u32,
    index_count: u32,
) -> Result<u64, String> {
    use crate::data_structures::mesh::ShadowVertex;

    if vertex_count == 0 || index_count == 0 {
        return Err(format!(
            "empty mesh ({} vertices, {} indices)",
            vertex_count, index_count
        ));
    }
    if vertex_bytes == 0 || index_bytes == 0 {
        return Err("empty vertex or index buffer".to_string());
    }
    let stride = vertex_bytes / vertex_count as u64;
    if stride < ShadowVertex::SIZE as u64 {
        return Err(format!(
            "vertex stride {} smaller than {}",
            stride,
            ShadowVertex::SIZE
        ));
    }
    if index_bytes < index_count as u64 * 4 {
        return Err(format!(
            "index buffer holds {} bytes, {} indices need {}",
            index_bytes,
            index_count,
            index_count as u64 * 4
        ));
    }
    Ok(stride)
}

/// [`validate_mesh`] for pipelines with a fixed vertex layout: the stride must
/// be exactly one [`crate::data_structures::mesh::ShadowVertex`].
pub(crate) fn validate_packed_mesh(
    vertex_bytes: u64,
    index_bytes: u64,
    vertex_count: u32,
    index_count: u32,
) -> Result<u64, String> {
    use crate::data_structures::mesh::ShadowVertex;

    let stride = validate_mesh(vertex_bytes, index_bytes, vertex_count, index_count)?;
    if stride != ShadowVertex::SIZE as u64 {
        return Err(format!(
            "vertex stride {} differs from the pipeline stride {}",
            stride,
            ShadowVertex::SIZE
        ));
    }
    Ok(stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> BackendCore {
        let mut core = BackendCore::default();
        core.create();
        core
    }

    #[test]
    fn calls_before_create_are_ignored() {
        let mut core = BackendCore::default();
        core.set_light([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 50.0);
        let mut out = [0.0; 16];
        core.get_light(&mut out);
        assert_eq!(&out, ShadowTransform::identity().as_array());
    }

    #[test]
    fn release_only_once() {
        let mut core = ready();
        assert!(core.release());
        assert!(!core.release());
    }

    #[test]
    fn out_of_range_texture_is_opaque() {
        let mut core = ready();
        core.texture_count = 2;
        let slot = core.push_object() as u32;
        core.set_texture_index(slot, 1);
        assert_eq!(core.objects[0].texture_index, 1);
        core.set_texture_index(slot, 2);
        assert_eq!(core.objects[0].texture_index, -1);
    }

    #[test]
    fn transform_keeps_texture_index() {
        let mut core = ready();
        core.texture_count = 1;
        core.push_object();
        core.set_texture_index(0, 0);
        core.set_transform(0, [1.0, 2.0, 3.0], [1.0; 3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(core.objects[0].texture_index, 0);
        assert_eq!(core.objects[0].model[3], [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn out_of_range_object_is_ignored() {
        let mut core = ready();
        core.set_transform(4, [0.0; 3], [1.0; 3], [0.0, 0.0, 0.0, 1.0]);
        assert!(core.objects.is_empty());
    }

    #[test]
    fn mesh_validation() {
        assert_eq!(validate_mesh(96, 12, 3, 3), Ok(32));
        assert!(validate_mesh(0, 12, 3, 3).is_err());
        assert!(validate_mesh(96, 12, 0, 3).is_err());
        assert!(validate_mesh(36, 12, 3, 3).is_err());
        assert!(validate_mesh(96, 8, 3, 3).is_err());
    }

    #[test]
    fn packed_mesh_needs_exact_stride() {
        assert_eq!(validate_mesh(144, 12, 3, 3), Ok(48));
        assert!(validate_packed_mesh(144, 12, 3, 3).is_err());
        assert_eq!(validate_packed_mesh(96, 12, 3, 3), Ok(32));
        assert!(validate_packed_mesh(0, 12, 3, 3).is_err());
    }
}
