#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use async_shadow::{
    CpuShadowBackend, SceneResources, ShadowBackend,
    backend::cpu::{CpuDepthTarget, CpuTexture},
    data_structures::{instance::ObjectTransform, mesh::MeshData},
    registrar::MeshBinding,
    scene::{ObjectTable, TextureSlot},
};

pub(crate) fn init() {
    async_shadow::init_logger();
}

/// Counts of every backend entry point a [`RecordingBackend`] saw.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub check_device: u32,
    pub create_resources: u32,
    pub release_resources: u32,
    pub send_mesh_data: u32,
    pub send_texture_data: u32,
    pub send_shadow_texture_data: u32,
    pub set_object_transform: u32,
    pub set_obj_texture_index: u32,
    pub set_light_transform: u32,
    pub get_light_transform: u32,
    pub set_render_method: u32,
    pub render_shadows: u32,
    /// Per-frame calls in arrival order.
    pub frame_order: Vec<&'static str>,
}

/// Failures to inject.
#[derive(Debug, Default, Clone)]
pub(crate) struct Faults {
    pub check_device: bool,
    pub create_resources: bool,
    pub shadow_target: bool,
    /// Mesh registrations (by call number) that fail.
    pub meshes: Vec<u32>,
}

/// Wraps a backend, counting calls and failing on demand.
pub(crate) struct RecordingBackend<B> {
    pub inner: B,
    pub faults: Faults,
    pub calls: Rc<RefCell<Calls>>,
}

impl<B> RecordingBackend<B> {
    pub fn new(inner: B, faults: Faults) -> (Self, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        (
            Self {
                inner,
                faults,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl<B: ShadowBackend> ShadowBackend for RecordingBackend<B> {
    type Buffer = B::Buffer;
    type Texture = B::Texture;
    type DepthTarget = B::DepthTarget;

    fn check_device(&mut self) -> bool {
        self.calls.borrow_mut().check_device += 1;
        !self.faults.check_device && self.inner.check_device()
    }

    fn create_resources(&mut self) -> bool {
        self.calls.borrow_mut().create_resources += 1;
        !self.faults.create_resources && self.inner.create_resources()
    }

    fn release_resources(&mut self) {
        self.calls.borrow_mut().release_resources += 1;
        self.inner.release_resources();
    }

    fn send_mesh_data(
        &mut self,
        vertex_buffer: &B::Buffer,
        index_buffer: &B::Buffer,
        vertex_count: u32,
        index_count: u32,
    ) -> bool {
        let call = {
            let mut calls = self.calls.borrow_mut();
            calls.send_mesh_data += 1;
            calls.send_mesh_data - 1
        };
        !self.faults.meshes.contains(&call)
            && self
                .inner
                .send_mesh_data(vertex_buffer, index_buffer, vertex_count, index_count)
    }

    fn send_texture_data(&mut self, texture: &B::Texture) -> bool {
        self.calls.borrow_mut().send_texture_data += 1;
        self.inner.send_texture_data(texture)
    }

    fn send_shadow_texture_data(&mut self, target: &B::DepthTarget) -> bool {
        self.calls.borrow_mut().send_shadow_texture_data += 1;
        !self.faults.shadow_target && self.inner.send_shadow_texture_data(target)
    }

    fn set_object_transform(&mut self, index: u32, position: [f32; 3], scale: [f32; 3], rotation: [f32; 4]) {
        self.calls.borrow_mut().set_object_transform += 1;
        self.inner.set_object_transform(index, position, scale, rotation);
    }

    fn set_obj_texture_index(&mut self, index: u32, texture_index: i32) {
        self.calls.borrow_mut().set_obj_texture_index += 1;
        self.inner.set_obj_texture_index(index, texture_index);
    }

    fn set_light_transform(&mut self, position: [f32; 3], direction: [f32; 3], radius: f32) {
        let mut calls = self.calls.borrow_mut();
        calls.set_light_transform += 1;
        calls.frame_order.push("set_light_transform");
        drop(calls);
        self.inner.set_light_transform(position, direction, radius);
    }

    fn get_light_transform(&self, out: &mut [f32; 16]) {
        let mut calls = self.calls.borrow_mut();
        calls.get_light_transform += 1;
        calls.frame_order.push("get_light_transform");
        drop(calls);
        self.inner.get_light_transform(out);
    }

    fn set_render_method(&mut self, use_indirect: bool, use_bundle: bool) {
        let mut calls = self.calls.borrow_mut();
        calls.set_render_method += 1;
        calls.frame_order.push("set_render_method");
        drop(calls);
        self.inner.set_render_method(use_indirect, use_bundle);
    }

    fn render_shadows(&mut self, multi_threaded: bool) {
        let mut calls = self.calls.borrow_mut();
        calls.render_shadows += 1;
        calls.frame_order.push("render_shadows");
        drop(calls);
        self.inner.render_shadows(multi_threaded);
    }

    fn get_shadow_render_time(&self) -> f64 {
        self.inner.get_shadow_render_time()
    }
}

pub(crate) fn binding(mesh: &MeshData) -> MeshBinding<async_shadow::backend::cpu::CpuBuffer> {
    let (vb, ib) = mesh.to_cpu_buffers();
    MeshBinding::new(&mesh.name, vb, ib, mesh.vertex_count(), mesh.index_count())
}

/// One triangle, one texture, one opaque object at the origin.
pub(crate) fn single_triangle_scene(map_size: u32) -> SceneResources<CpuShadowBackend> {
    let mut objects = ObjectTable::new();
    objects.push(0, ObjectTransform::new(), TextureSlot::Opaque);
    SceneResources {
        meshes: vec![binding(&MeshData::triangle(1.0))],
        textures: vec![CpuTexture::solid(4, 4, [255, 255, 255, 255])],
        shadow_target: CpuDepthTarget::new(map_size),
        objects,
    }
}

/// Same scene for a [`RecordingBackend`] around the CPU backend.
pub(crate) fn recorded(scene: SceneResources<CpuShadowBackend>) -> SceneResources<RecordingBackend<CpuShadowBackend>> {
    SceneResources {
        meshes: scene.meshes,
        textures: scene.textures,
        shadow_target: scene.shadow_target,
        objects: scene.objects,
    }
}

/// 8x8 checkerboard, every other texel fully transparent.
pub(crate) fn checkerboard() -> image::RgbaImage {
    let mut img = image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 255]));
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        if (x + y) % 2 == 1 {
            pixel.0[3] = 0;
        }
    }
    img
}

pub(crate) fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}
