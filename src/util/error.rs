//! Error types for the baker.

use std::path::PathBuf;
use thiserror::Error;

use crate::render::{Program, TargetId};

/// Main error type for bake operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration value out of its accepted range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend cannot run a program the bake needs
    #[error("Missing program: {0:?}")]
    MissingProgram(Program),

    /// Render target could not be created
    #[error("Failed to allocate {label} target ({size}x{size}): {reason}")]
    TargetAllocation {
        label: String,
        size: u32,
        reason: String,
    },

    /// Handle does not name a live render target
    #[error("Unknown render target: {0:?}")]
    UnknownTarget(TargetId),

    /// A pass tried to read and write the same target
    #[error("Target {0:?} is bound as both source and destination")]
    TargetAliasing(TargetId),

    /// Target has the wrong format for the pass
    #[error("Target {target:?} has wrong format: expected {expected}")]
    TargetFormat { target: TargetId, expected: &'static str },

    /// Scene description or scene lookup failure
    #[error("Scene error: {0}")]
    SceneLoad(String),

    /// Output file could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bake was cancelled through its token
    #[error("Bake cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (config or scene) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a scene error.
    pub fn scene(msg: impl Into<String>) -> Self {
        Self::SceneLoad(msg.into())
    }
}

/// Result type alias for bake operations.
pub type Result<T> = std::result::Result<T, Error>;
