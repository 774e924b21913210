//! Data structures handed across the backend boundary.
//!
//! - `instance` holds per-object transforms and the raw per-object record
//! - `mesh` contains the shared vertex layout and caller-side mesh data
//! - `texture` creates shadow maps and cutout textures and decodes images

pub mod instance;
pub mod mesh;
pub mod texture;
