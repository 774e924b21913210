//! Shadow casters and their stable indices.
//!
//! The [`ObjectTable`] hands out indices `0..N` in insertion order and never
//! reuses one. The backend addresses objects purely by index, so the table is
//! append-only for as long as it is registered.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::data_structures::instance::ObjectTransform;

/// Texture binding of one shadow caster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TextureSlot {
    /// Fully opaque, no alpha test.
    #[default]
    Opaque,
    /// Alpha tested against the registered texture at this index.
    Cutout(u32),
}

impl TextureSlot {
    /// Wire value of the opaque sentinel.
    pub const OPAQUE_SENTINEL: i32 = -1;

    pub fn to_raw(self) -> i32 {
        match self {
            TextureSlot::Opaque => Self::OPAQUE_SENTINEL,
            TextureSlot::Cutout(index) => index as i32,
        }
    }

    /// Negative values decode as opaque.
    pub fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            TextureSlot::Opaque
        } else {
            TextureSlot::Cutout(raw as u32)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneObject {
    pub index: u32,
    /// Which caller-side mesh this object draws.
    pub mesh: usize,
    pub transform: ObjectTransform,
    pub texture: TextureSlot,
}

/// Append-only store of shadow casters.
#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: Vec<SceneObject>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its index.
    pub fn push(&mut self, mesh: usize, transform: ObjectTransform, texture: TextureSlot) -> u32 {
        let index = self.objects.len() as u32;
        self.objects.push(SceneObject {
            index,
            mesh,
            transform,
            texture,
        });
        index
    }

    pub fn get(&self, index: u32) -> Option<&SceneObject> {
        self.objects.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.iter()
    }
}

/// Parameters for a randomly scattered test scene.
#[derive(Clone, Debug)]
pub struct ScatterParams {
    pub count: usize,
    /// Objects are placed in `[-range, range]` on x/z and `[0, range]` on y.
    pub range: f32,
    pub mesh_count: usize,
    pub texture_count: usize,
    pub seed: u64,
}

impl Default for ScatterParams {
    fn default() -> Self {
        Self {
            count: 1000,
            range: 500.0,
            mesh_count: 1,
            texture_count: 1,
            seed: 42,
        }
    }
}

/// Scatter `params.count` objects with random placement and scale.
///
/// Objects up to and including `count / 2` are opaque, the remainder cut out
/// with texture `index % texture_count`. Meshes are assigned round-robin.
pub fn scatter(params: &ScatterParams) -> ObjectTable {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let range = params.range.abs();
    let half = params.count / 2;
    let mut table = ObjectTable::new();

    for i in 0..params.count {
        let mesh = if params.mesh_count == 0 { 0 } else { i % params.mesh_count };
        let texture = if i <= half || params.texture_count == 0 {
            TextureSlot::Opaque
        } else {
            TextureSlot::Cutout((i % params.texture_count) as u32)
        };

        let mut transform = ObjectTransform::new();
        if range > 0.0 {
            transform.position = cgmath::Vector3::new(
                rng.random_range(-range..range),
                rng.random_range(0.0..range),
                rng.random_range(-range..range),
            );
        }
        transform.scale = cgmath::Vector3::new(
            rng.random_range(10.0..20.0),
            rng.random_range(10.0..20.0),
            rng.random_range(10.0..20.0),
        );

        table.push(mesh, transform, texture);
    }

    log::debug!("scattered {} objects ({} opaque)", params.count, params.count.min(half + 1));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_stable() {
        for n in [0usize, 1, 2, 7, 64] {
            let table = scatter(&ScatterParams {
                count: n,
                ..Default::default()
            });
            assert_eq!(table.len(), n);
            let indices: Vec<u32> = table.iter().map(|o| o.index).collect();
            assert_eq!(indices, (0..n as u32).collect::<Vec<_>>());
        }
    }

    #[test]
    fn push_never_reuses_an_index() {
        let mut table = ObjectTable::new();
        let a = table.push(0, ObjectTransform::new(), TextureSlot::Opaque);
        let b = table.push(0, ObjectTransform::new(), TextureSlot::Cutout(0));
        assert_ne!(a, b);
        assert_eq!(table.get(b).map(|o| o.texture), Some(TextureSlot::Cutout(0)));
    }

    #[test]
    fn opaque_and_cutout_halves() {
        let params = ScatterParams {
            count: 101,
            texture_count: 4,
            ..Default::default()
        };
        let table = scatter(&params);
        for object in table.iter() {
            let raw = object.texture.to_raw();
            if object.index as usize <= params.count / 2 {
                assert_eq!(raw, -1);
            } else {
                assert!((0..params.texture_count as i32).contains(&raw));
            }
        }
    }

    #[test]
    fn placement_stays_in_range() {
        let params = ScatterParams {
            count: 200,
            range: 30.0,
            ..Default::default()
        };
        for object in scatter(&params).iter() {
            let p = object.transform.position;
            assert!(p.x.abs() <= 30.0 && p.z.abs() <= 30.0);
            assert!((0.0..=30.0).contains(&p.y));
            let s = object.transform.scale;
            assert!([s.x, s.y, s.z].iter().all(|v| (10.0..20.0).contains(v)));
        }
    }

    #[test]
    fn same_seed_same_scene() {
        let a = scatter(&ScatterParams::default());
        let b = scatter(&ScatterParams::default());
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x == y));
    }

    #[test]
    fn sentinel_round_trip() {
        assert_eq!(TextureSlot::from_raw(-1), TextureSlot::Opaque);
        assert_eq!(TextureSlot::from_raw(3), TextureSlot::Cutout(3));
        assert_eq!(TextureSlot::Cutout(3).to_raw(), 3);
    }
}
