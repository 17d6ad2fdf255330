//! Utility types shared by the whole crate.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`BBox3f`] and math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
