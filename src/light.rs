//! Directional light pose and shadow transform fitting.
//!
//! The light is directional: only its forward vector matters for the
//! projection, while its position anchors the view. Each frame the light
//! frustum is refit as an orthographic box of half-extent `radius` around the
//! world origin as seen from the light.
//!
//! Conventions: left-handed view space looking down +Z, clip depth in
//! `[0, 1]`, and the 16-float wire layout is row-major for column vectors, so
//! translation lands in elements 3, 7 and 11.

use cgmath::{InnerSpace, Matrix4, Rotation3, Vector3, Vector4};

/// Pose of the shadow casting light, updated by the caller every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightState {
    pub position: Vector3<f32>,
    pub forward: Vector3<f32>,
    pub shadow_radius: f32,
}

impl LightState {
    pub fn new(position: [f32; 3], forward: [f32; 3], shadow_radius: f32) -> Self {
        Self {
            position: position.into(),
            forward: forward.into(),
            shadow_radius,
        }
    }

    /// Rotate position and forward about world Y.
    pub fn orbit_y(&mut self, degrees: f32) {
        let rotation = cgmath::Quaternion::from_angle_y(cgmath::Deg(degrees));
        self.position = rotation * self.position;
        self.forward = rotation * self.forward;
    }

    pub fn position_array(&self) -> [f32; 3] {
        self.position.into()
    }

    pub fn forward_array(&self) -> [f32; 3] {
        self.forward.into()
    }
}

impl Default for LightState {
    fn default() -> Self {
        Self::new([0.0, 50.0, -50.0], [0.0, -0.70710677, 0.70710677], 100.0)
    }
}

/// Reusable row-major 4x4 matrix buffer.
///
/// The storage is allocated once and only overwritten afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowTransform {
    m: [f32; 16],
}

impl ShadowTransform {
    pub fn identity() -> Self {
        Self::from_matrix(&Matrix4::from_scale(1.0))
    }

    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        let mut out = Self { m: [0.0; 16] };
        out.store(matrix);
        out
    }

    /// Overwrite the contents with `matrix` in row-major order.
    pub fn store(&mut self, matrix: &Matrix4<f32>) {
        write_row_major(matrix, &mut self.m);
    }

    pub fn as_array(&self) -> &[f32; 16] {
        &self.m
    }

    pub fn as_mut_array(&mut self) -> &mut [f32; 16] {
        &mut self.m
    }

    pub fn as_ptr(&self) -> *const f32 {
        self.m.as_ptr()
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }

    pub fn as_matrix(&self) -> Matrix4<f32> {
        read_row_major(&self.m)
    }

    /// Project a world space point to normalized device coordinates.
    pub fn project_point(&self, point: [f32; 3]) -> [f32; 3] {
        let clip = self.as_matrix() * Vector4::new(point[0], point[1], point[2], 1.0);
        [clip.x / clip.w, clip.y / clip.w, clip.z / clip.w]
    }
}

impl Default for ShadowTransform {
    fn default() -> Self {
        Self::identity()
    }
}

pub fn write_row_major(matrix: &Matrix4<f32>, out: &mut [f32; 16]) {
    // cgmath indexes columns first
    for row in 0..4 {
        for col in 0..4 {
            out[row * 4 + col] = matrix[col][row];
        }
    }
}

pub fn read_row_major(m: &[f32; 16]) -> Matrix4<f32> {
    Matrix4::new(
        m[0], m[4], m[8], m[12], //
        m[1], m[5], m[9], m[13], //
        m[2], m[6], m[10], m[14], //
        m[3], m[7], m[11], m[15],
    )
}

/// Left-handed view matrix looking from `eye` along `forward`.
///
/// When `forward` is nearly vertical the usual +Y up vector is parallel to it,
/// so +X is used instead.
pub fn look_to_lh(eye: Vector3<f32>, forward: Vector3<f32>) -> Matrix4<f32> {
    let z = forward.normalize();
    let up = if z.y.abs() > 0.99 {
        Vector3::unit_x()
    } else {
        Vector3::unit_y()
    };
    let x = up.cross(z).normalize();
    let y = z.cross(x);

    Matrix4::new(
        x.x, y.x, z.x, 0.0, //
        x.y, y.y, z.y, 0.0, //
        x.z, y.z, z.z, 0.0, //
        -x.dot(eye), -y.dot(eye), -z.dot(eye), 1.0,
    )
}

/// Off-center orthographic projection mapping depth `[n, f]` to `[0, 1]`.
pub fn orthographic_off_center_lh(l: f32, r: f32, b: f32, t: f32, n: f32, f: f32) -> Matrix4<f32> {
    let w = 1.0 / (r - l);
    let h = 1.0 / (t - b);
    let d = 1.0 / (f - n);

    Matrix4::new(
        2.0 * w, 0.0, 0.0, 0.0, //
        0.0, 2.0 * h, 0.0, 0.0, //
        0.0, 0.0, d, 0.0, //
        -(l + r) * w, -(t + b) * h, -n * d, 1.0,
    )
}

/// Fit the orthographic light frustum and return `projection * view`.
///
/// The radius is used exactly as given; a non-positive radius yields a
/// degenerate, possibly non-finite, matrix.
pub fn fit_shadow_transform(position: [f32; 3], forward: [f32; 3], radius: f32) -> Matrix4<f32> {
    let view = look_to_lh(position.into(), forward.into());

    // fit sphere is centered on the world origin
    let center = view * Vector4::new(0.0, 0.0, 0.0, 1.0);

    let l = center.x - radius;
    let b = center.y - radius;
    let n = center.z - radius;
    let r = center.x + radius;
    let t = center.y + radius;
    let f = center.z + radius;

    orthographic_off_center_lh(l, r, b, t, n, f) * view
}

/// Light constants as the shadow shader reads them.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    pub view_proj: [[f32; 4]; 4],
}

impl LightUniform {
    pub fn new(shadow: &ShadowTransform) -> Self {
        Self {
            view_proj: shadow.as_matrix().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn row_major_puts_translation_in_last_column() {
        let m = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0));
        let t = ShadowTransform::from_matrix(&m);
        let a = t.as_array();
        assert_eq!((a[3], a[7], a[11], a[15]), (1.0, 2.0, 3.0, 1.0));
        assert_eq!(t.as_matrix(), m);
    }

    #[test]
    fn straight_down_light_is_finite() {
        let m = fit_shadow_transform([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 50.0);
        let t = ShadowTransform::from_matrix(&m);
        assert!(t.is_finite());
    }

    #[test]
    fn light_position_maps_to_frustum_center() {
        let m = fit_shadow_transform([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 50.0);
        let t = ShadowTransform::from_matrix(&m);
        let p = t.project_point([0.0, 10.0, 0.0]);
        assert!(approx(p[0], 0.0) && approx(p[1], 0.0));
        // origin is 10 units in front, box spans [-40, 60]
        assert!(approx(p[2], 0.4));
        let origin = t.project_point([0.0, 0.0, 0.0]);
        assert!(approx(origin[2], 0.5));
    }

    #[test]
    fn radius_is_the_half_extent() {
        let m = fit_shadow_transform([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 50.0);
        let t = ShadowTransform::from_matrix(&m);
        let edge_x = t.project_point([50.0, 0.0, 0.0]);
        let edge_z = t.project_point([0.0, 0.0, 50.0]);
        let lateral = [edge_x[0].abs(), edge_x[1].abs(), edge_z[0].abs(), edge_z[1].abs()];
        // one of the lateral axes hits the edge exactly, the other stays centered
        assert!(lateral.iter().filter(|v| approx(**v, 1.0)).count() == 2);
        assert!(lateral.iter().filter(|v| approx(**v, 0.0)).count() == 2);
    }

    #[test]
    fn view_is_orthonormal_for_tilted_light() {
        let view = look_to_lh(Vector3::new(3.0, 4.0, 5.0), Vector3::new(0.3, -0.8, 0.5));
        let x = view.x.truncate();
        let y = view.y.truncate();
        let z = view.z.truncate();
        // rows of the rotation part are orthonormal, so are its columns
        assert!(approx(x.magnitude(), 1.0) && approx(y.magnitude(), 1.0) && approx(z.magnitude(), 1.0));
        assert!(approx(x.dot(y), 0.0) && approx(y.dot(z), 0.0) && approx(x.dot(z), 0.0));
    }

    #[test]
    fn orbiting_keeps_every_frame_finite() {
        let mut light = LightState::default();
        for _ in 0..720 {
            light.orbit_y(0.5);
            let m = fit_shadow_transform(light.position_array(), light.forward_array(), 100.0);
            assert!(ShadowTransform::from_matrix(&m).is_finite());
        }
    }

    #[test]
    fn zero_radius_is_not_finite() {
        let m = fit_shadow_transform([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 0.0);
        assert!(!ShadowTransform::from_matrix(&m).is_finite());
    }
}
