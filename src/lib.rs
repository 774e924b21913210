//! async-shadow
//!
//! Shadow map orchestration for a single directional light. This crate owns
//! the CPU-side contract between a scene and a rendering backend: one-time
//! registration of meshes, cutout textures and the depth target, stable
//! per-object addressing, per-frame light frustum fitting and the choice
//! between direct, indirect and bundled draw submission.
//!
//! High-level modules
//! - `backend`: the backend entry points plus a CPU reference rasterizer and a wgpu backend
//! - `context`: headless wgpu device and queue
//! - `data_structures`: per-object transforms, vertex layout and textures
//! - `errors`: fatal setup errors
//! - `light`: light pose and shadow transform fitting
//! - `orchestrator`: the per-frame driver owning a backend for one session
//! - `pipelines`: the depth-only shadow pipeline
//! - `registrar`: one-time resource registration
//! - `scene`: shadow casters, their stable indices and scene scattering
//! - `settings`: host-facing configuration
//!

pub mod backend;
pub mod context;
pub mod data_structures;
pub mod errors;
pub mod light;
pub mod orchestrator;
pub mod pipelines;
pub mod registrar;
pub mod scene;
pub mod settings;

// Re-exports commonly used types for convenience in downstream code.
pub use backend::{ShadowBackend, cpu::CpuShadowBackend, gpu::GpuShadowBackend};
pub use errors::{Result, ShadowError};
pub use light::{LightState, ShadowTransform};
pub use orchestrator::{FrameReport, LightPose, SceneResources, ShadowSystem, ShadowView};
pub use settings::{ShadowSettings, SubmissionMode};
pub use cgmath;
pub use wgpu;

/// Initialize `env_logger` unless a logger is already installed.
pub fn init_logger() {
    if let Err(e) = env_logger::try_init() {
        log::debug!("logger already initialized: {}", e);
    }
}
