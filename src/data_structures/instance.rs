//! Per-object transformation data for the shadow pass.
//!
//! Every shadow caster has exactly one transform, set once at scene build
//! time. The backend keeps the composed world matrix together with the cutout
//! texture index in an [`ObjectRaw`] record per object.

use cgmath::One;

/// Position, rotation (as quaternion) and scale of one shadow caster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectTransform {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl ObjectTransform {
    /// Create a transform with no translation, rotation or scaling.
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Build from the backend wire layout: xyz position, xyz scale, xyzw rotation.
    pub fn from_arrays(position: [f32; 3], scale: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            position: position.into(),
            // cgmath stores the scalar part first
            rotation: cgmath::Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
            scale: scale.into(),
        }
    }

    pub fn position_array(&self) -> [f32; 3] {
        self.position.into()
    }

    pub fn scale_array(&self) -> [f32; 3] {
        self.scale.into()
    }

    /// Rotation as `[x, y, z, w]`.
    pub fn rotation_array(&self) -> [f32; 4] {
        let q = self.rotation;
        [q.v.x, q.v.y, q.v.z, q.s]
    }

    /// World matrix, scale applied first, then rotation, then translation.
    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    pub fn to_raw(&self, texture_index: i32) -> ObjectRaw {
        ObjectRaw {
            model: self.to_matrix().into(),
            texture_index,
            _padding: [0; 3],
        }
    }
}

impl From<cgmath::Vector3<f32>> for ObjectTransform {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        ObjectTransform {
            position,
            ..Default::default()
        }
    }
}

impl Default for ObjectTransform {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * The raw object record is what the shadow shader reads per draw: the
 * column-major world matrix and the cutout texture layer (-1 for opaque).
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectRaw {
    pub model: [[f32; 4]; 4],
    pub texture_index: i32,
    // Uniforms require 16 byte spacing
    _padding: [i32; 3],
}

impl ObjectRaw {
    pub fn model_matrix(&self) -> cgmath::Matrix4<f32> {
        self.model.into()
    }
}

impl Default for ObjectRaw {
    fn default() -> Self {
        ObjectTransform::new().to_raw(-1)
    }
}
