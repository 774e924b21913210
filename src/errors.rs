//! Error types for shadow system setup.
//!
//! Only initialization can fail fatally. Per-item registration failures and
//! per-frame data errors are logged and absorbed where they happen, so they
//! never show up here.

use thiserror::Error;

/// Fatal failures that leave the shadow system disabled for the session.
#[derive(Error, Debug)]
pub enum ShadowError {
    /// The backend's capability probe failed.
    #[error("shadow backend device check failed")]
    DeviceCheck,

    /// The backend could not allocate its internal state.
    #[error("shadow backend failed to create resources")]
    ResourceCreation,

    /// The depth target could not be registered; nothing can be drawn.
    #[error("failed to register shadow render target '{0}'")]
    ShadowTarget(String),

    /// GPU context creation failed.
    #[error("GPU context unavailable: {0}")]
    Context(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ShadowError>;
