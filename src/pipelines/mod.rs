//! Render pipelines.
//!
//! - `shadow`: depth-only light pass with cutout alpha test

pub mod shadow;
