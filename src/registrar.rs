//! One-time registration of caller-owned resources with a backend.
//!
//! The registrar never allocates buffers or textures; it hands references to
//! what the caller already created. Meshes are registered once per object, so
//! the backend can address every object by its slot. Slots are dense: the
//! k-th mesh the backend accepts gets slot k, and objects whose mesh was
//! rejected have no slot and are never drawn.

use crate::{
    backend::ShadowBackend,
    errors::{Result, ShadowError},
    scene::{ObjectTable, TextureSlot},
};

/// Caller-owned geometry of one mesh.
#[derive(Clone, Debug)]
pub struct MeshBinding<B> {
    pub name: String,
    pub vertex_buffer: B,
    pub index_buffer: B,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl<B> MeshBinding<B> {
    pub fn new(name: &str, vertex_buffer: B, index_buffer: B, vertex_count: u32, index_count: u32) -> Self {
        Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
        }
    }
}

/// Scene index to backend slot for every object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshRegistration {
    slots: Vec<Option<u32>>,
}

impl MeshRegistration {
    pub fn slot_of(&self, scene_index: u32) -> Option<u32> {
        self.slots.get(scene_index as usize).copied().flatten()
    }

    /// Objects that got a backend slot.
    pub fn registered(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn skipped(&self) -> usize {
        self.slots.len() - self.registered()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Caller texture index to backend texture index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureRegistration {
    slots: Vec<Option<u32>>,
}

impl TextureRegistration {
    pub fn slot_of(&self, texture_index: u32) -> Option<u32> {
        self.slots.get(texture_index as usize).copied().flatten()
    }

    pub fn registered(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn skipped(&self) -> usize {
        self.slots.len() - self.registered()
    }
}

/// Register each object's mesh. Failures are logged and skipped.
pub fn register_meshes<B: ShadowBackend>(
    backend: &mut B,
    table: &ObjectTable,
    meshes: &[MeshBinding<B::Buffer>],
) -> MeshRegistration {
    let mut next_slot = 0u32;
    let slots = table
        .iter()
        .map(|object| {
            let Some(mesh) = meshes.get(object.mesh) else {
                log::error!(
                    "object {}: mesh {} does not exist ({} meshes)",
                    object.index,
                    object.mesh,
                    meshes.len()
                );
                return None;
            };
            if backend.send_mesh_data(
                &mesh.vertex_buffer,
                &mesh.index_buffer,
                mesh.vertex_count,
                mesh.index_count,
            ) {
                let slot = next_slot;
                next_slot += 1;
                Some(slot)
            } else {
                log::error!(
                    "object {}: failed to register mesh {:?}",
                    object.index,
                    mesh.name
                );
                None
            }
        })
        .collect();
    let registration = MeshRegistration { slots };
    log::info!(
        "registered {} meshes, {} skipped",
        registration.registered(),
        registration.skipped()
    );
    registration
}

/// Register cutout textures in order. Failures are logged and skipped.
pub fn register_textures<B: ShadowBackend>(backend: &mut B, textures: &[B::Texture]) -> TextureRegistration {
    let mut next_slot = 0u32;
    let slots = textures
        .iter()
        .enumerate()
        .map(|(i, texture)| {
            if backend.send_texture_data(texture) {
                let slot = next_slot;
                next_slot += 1;
                Some(slot)
            } else {
                log::error!("failed to register texture {}", i);
                None
            }
        })
        .collect();
    let registration = TextureRegistration { slots };
    log::info!(
        "registered {} textures, {} skipped",
        registration.registered(),
        registration.skipped()
    );
    registration
}

/// Register the depth target. Without it nothing can be drawn.
pub fn register_shadow_target<B: ShadowBackend>(backend: &mut B, target: &B::DepthTarget, label: &str) -> Result<()> {
    if backend.send_shadow_texture_data(target) {
        Ok(())
    } else {
        log::error!("failed to register shadow target {:?}", label);
        Err(ShadowError::ShadowTarget(label.to_string()))
    }
}

/// Send every registered object's transform and texture slot, once.
///
/// Returns the number of objects transmitted.
pub fn transmit_objects<B: ShadowBackend>(
    backend: &mut B,
    table: &ObjectTable,
    meshes: &MeshRegistration,
    textures: &TextureRegistration,
) -> usize {
    let mut sent = 0;
    for object in table.iter() {
        let Some(slot) = meshes.slot_of(object.index) else {
            continue;
        };
        let t = &object.transform;
        backend.set_object_transform(slot, t.position_array(), t.scale_array(), t.rotation_array());

        let texture = match object.texture {
            TextureSlot::Opaque => TextureSlot::Opaque,
            TextureSlot::Cutout(i) => match textures.slot_of(i) {
                Some(slot) => TextureSlot::Cutout(slot),
                None => {
                    log::warn!(
                        "object {}: texture {} was not registered, drawing opaque",
                        object.index,
                        i
                    );
                    TextureSlot::Opaque
                }
            },
        };
        backend.set_obj_texture_index(slot, texture.to_raw());
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::cpu::{CpuBuffer, CpuDepthTarget, CpuShadowBackend, CpuTexture},
        data_structures::{instance::ObjectTransform, mesh::MeshData},
    };

    fn binding(mesh: &MeshData) -> MeshBinding<CpuBuffer> {
        let (vb, ib) = mesh.to_cpu_buffers();
        MeshBinding::new(&mesh.name, vb, ib, mesh.vertex_count(), mesh.index_count())
    }

    fn ready_backend() -> CpuShadowBackend {
        let mut backend = CpuShadowBackend::new();
        assert!(backend.create_resources());
        backend
    }

    #[test]
    fn slots_are_dense_around_failures() {
        let mut backend = ready_backend();
        let good = binding(&MeshData::triangle(1.0));
        let mut bad = good.clone();
        bad.vertex_count = 0;

        let mut table = ObjectTable::new();
        for mesh in [0, 1, 0, 7, 0] {
            table.push(mesh, ObjectTransform::new(), TextureSlot::Opaque);
        }
        let registration = register_meshes(&mut backend, &table, &[good, bad]);
        assert_eq!(registration.slot_of(0), Some(0));
        assert_eq!(registration.slot_of(1), None);
        assert_eq!(registration.slot_of(2), Some(1));
        assert_eq!(registration.slot_of(3), None);
        assert_eq!(registration.slot_of(4), Some(2));
        assert_eq!(registration.registered(), 3);
        assert_eq!(registration.skipped(), 2);
        assert_eq!(backend.mesh_count(), 3);
    }

    #[test]
    fn skipped_texture_does_not_shift_later_objects() {
        let mut backend = ready_backend();
        let textures = [
            CpuTexture::solid(1, 1, [0, 0, 0, 255]),
            CpuTexture::solid(0, 0, [0; 4]),
            CpuTexture::solid(1, 1, [0, 0, 0, 255]),
        ];
        let registration = register_textures(&mut backend, &textures);
        assert_eq!(registration.registered(), 2);
        assert_eq!(registration.slot_of(2), Some(1));

        let mut table = ObjectTable::new();
        table.push(0, ObjectTransform::new(), TextureSlot::Cutout(2));
        table.push(0, ObjectTransform::new(), TextureSlot::Cutout(1));
        let meshes = register_meshes(&mut backend, &table, &[binding(&MeshData::triangle(1.0))]);
        assert_eq!(transmit_objects(&mut backend, &table, &meshes, &registration), 2);
        assert_eq!(backend.object_texture_index(0), Some(1));
        assert_eq!(backend.object_texture_index(1), Some(-1));
    }

    #[test]
    fn failing_target_is_fatal() {
        let mut backend = ready_backend();
        let err = register_shadow_target(&mut backend, &CpuDepthTarget::new(0), "shadow map").unwrap_err();
        assert!(matches!(err, ShadowError::ShadowTarget(label) if label == "shadow map"));
        assert!(register_shadow_target(&mut backend, &CpuDepthTarget::new(4), "shadow map").is_ok());
    }
}
