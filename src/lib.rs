//! # BNAO
//!
//! Bent normal and ambient occlusion texture baker for 3D meshes.
//!
//! Meshes from a host scene are rasterized in UV space into world position
//! and normal caches, then lit from many directions spread over a sphere.
//! Each direction renders an orthographic depth map; texels compare against
//! it and a running average builds either the mean unoccluded direction
//! (bent normal) or the unoccluded fraction (ambient occlusion). The same
//! pipeline also converts normal maps between tangent and object space.
//!
//! ## Modules
//!
//! - [`bake`] - The pipeline and [`Baker`]
//! - [`config`] - [`BakeConfig`] and its enums
//! - [`scene`] - Host scene model, meshes, textures
//! - [`render`] - Offscreen rendering trait and the CPU backend
//! - [`shading`] - Per-texel kernels
//! - [`storage`] - Output persistence
//! - [`progress`] - Progress sinks and cancellation
//! - [`util`] - Errors and math
//!
//! ## Example
//!
//! ```no_run
//! use bnao::prelude::*;
//! use std::path::Path;
//!
//! let desc = bnao::scene::desc::SceneDesc::load("scene.json")?;
//! let (mut scene, selection) = desc.build(Path::new("."))?;
//! let outcome = Baker::new(BakeConfig::default())
//!     .bake(&mut scene, &selection, &mut SoftwareBackend::new(), &mut FsStorage::new("."))?;
//! # Ok::<(), bnao::Error>(())
//! ```

pub mod bake;
pub mod config;
pub mod progress;
pub mod render;
pub mod scene;
pub mod shading;
pub mod storage;
pub mod util;

// Re-export commonly used types
pub use bake::{bake, BakeOutcome, BakeReport, Baker};
pub use config::BakeConfig;
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bake::{BakeOutcome, BakeReport, Baker};
    pub use crate::config::{BakeConfig, BakeMode, NameMode, NormalsConversionMode, NormalsSpace, Resolution, UvChannel};
    pub use crate::progress::{CancellationToken, Progress, ProgressUpdate};
    pub use crate::render::{RenderBackend, SoftwareBackend};
    pub use crate::scene::{Material, Mesh, NodeId, Renderer, Scene, Texture};
    pub use crate::storage::{FsStorage, Storage};
    pub use crate::util::{Error, Mat4, Result, Vec2, Vec3, Vec4};
}
