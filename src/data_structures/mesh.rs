//! Shadow caster geometry.
//!
//! Meshes are owned by the caller. The backend only ever sees the vertex and
//! index buffers produced here, together with the element counts.

use wgpu::util::DeviceExt;

use crate::backend::cpu::CpuBuffer;

/// Vertex layout shared by every mesh the shadow pass draws.
///
/// Only the position feeds depth; the uv drives the cutout alpha test. The
/// normal is carried so that the same buffers serve the lit pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl ShadowVertex {
    pub const SIZE: usize = std::mem::size_of::<ShadowVertex>();

    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coords,
        }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ShadowVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// CPU-side triangle list with 32-bit indices.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<ShadowVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str, vertices: Vec<ShadowVertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            vertices,
            indices,
        }
    }

    /// A single triangle in the XZ plane facing up.
    pub fn triangle(size: f32) -> Self {
        let up = [0.0, 1.0, 0.0];
        Self::new(
            "triangle",
            vec![
                ShadowVertex::new([-size, 0.0, -size], up, [0.0, 0.0]),
                ShadowVertex::new([size, 0.0, -size], up, [1.0, 0.0]),
                ShadowVertex::new([0.0, 0.0, size], up, [0.5, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    /// A square of side `2 * half_extent` in the XZ plane facing up.
    pub fn quad(half_extent: f32) -> Self {
        let h = half_extent;
        let up = [0.0, 1.0, 0.0];
        Self::new(
            "quad",
            vec![
                ShadowVertex::new([-h, 0.0, -h], up, [0.0, 0.0]),
                ShadowVertex::new([h, 0.0, -h], up, [1.0, 0.0]),
                ShadowVertex::new([h, 0.0, h], up, [1.0, 1.0]),
                ShadowVertex::new([-h, 0.0, h], up, [0.0, 1.0]),
            ],
            vec![0, 2, 1, 0, 3, 2],
        )
    }

    /// Axis aligned unit cube centered on the origin.
    pub fn cube() -> Self {
        // (normal, tangent u, tangent v) per face
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in faces {
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = [
                    0.5 * (n[0] + su * u[0] + sv * v[0]),
                    0.5 * (n[1] + su * u[1] + sv * v[1]),
                    0.5 * (n[2] + su * u[2] + sv * v[2]),
                ];
                let uv = [(su + 1.0) * 0.5, (sv + 1.0) * 0.5];
                vertices.push(ShadowVertex::new(position, n, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new("cube", vertices, indices)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn to_cpu_buffers(&self) -> (CpuBuffer, CpuBuffer) {
        (
            CpuBuffer::from_pod(&self.vertices),
            CpuBuffer::from_pod(&self.indices),
        )
    }

    /// Upload as vertex and index buffers the shadow pass can bind.
    pub fn upload(&self, device: &wgpu::Device) -> (wgpu::Buffer, wgpu::Buffer) {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", self.name)),
            contents: self.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", self.name)),
            contents: self.index_bytes(),
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        });

        (vertex_buffer, index_buffer)
    }
}
