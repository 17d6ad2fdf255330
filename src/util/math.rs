//! Math type re-exports and bake-specific math utilities.
//!
//! Re-exports the `glam` types used across the crate and provides the
//! axis-aligned bounds used for scene framing.

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Smallest radius a bake camera is allowed to orbit at.
pub const MIN_SPHERE_RADIUS: f32 = 1e-3;

/// 3D bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BBox3f {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox3f {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of a point cloud.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_by_point(p);
        }
        b
    }

    /// Check if this box is empty (no point was added).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Half-size along each axis.
    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Axis-aligned box enclosing this box after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_by_point(m.transform_point3(corner));
        }
        out
    }

    /// Sphere enclosing the box: (center, radius).
    ///
    /// Flat or point-like boxes still get `MIN_SPHERE_RADIUS` so the bake
    /// camera has a usable clip range.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        if self.is_empty() {
            return (Vec3::ZERO, MIN_SPHERE_RADIUS);
        }
        (self.center(), self.extents().length().max(MIN_SPHERE_RADIUS))
    }
}

impl Default for BBox3f {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3f {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox3f({:?} - {:?})", self.min, self.max)
    }
}

/// Build an orthonormal-ish tangent frame matrix (columns T, B, N).
#[inline]
pub fn tbn(tangent: Vec3, bitangent: Vec3, normal: Vec3) -> Mat3 {
    Mat3::from_cols(tangent, bitangent, normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox3f() {
        let mut b = BBox3f::EMPTY;
        assert!(b.is_empty());

        b.expand_by_point(Vec3::ZERO);
        assert!(!b.is_empty());
        assert_eq!(b.min, Vec3::ZERO);
        assert_eq!(b.max, Vec3::ZERO);

        b.expand_by_point(Vec3::ONE);
        assert_eq!(b.center(), Vec3::splat(0.5));
        assert_eq!(b.size(), Vec3::ONE);
    }

    #[test]
    fn test_transformed() {
        let b = BBox3f::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let out = b.transformed(&t);
        assert_eq!(out.min, Vec3::new(8.0, -2.0, -2.0));
        assert_eq!(out.max, Vec3::new(12.0, 2.0, 2.0));
    }

    #[test]
    fn test_bounding_sphere_covers_corners() {
        let b = BBox3f::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 1.0));
        let (c, r) = b.bounding_sphere();
        assert_eq!(c, Vec3::ZERO);
        assert!((r - 2f32.sqrt()).abs() < 1e-6);

        let point = BBox3f::from_points([Vec3::ONE]);
        assert_eq!(point.bounding_sphere().1, MIN_SPHERE_RADIUS);
    }

    #[test]
    fn test_bbox_pod() {
        assert_eq!(std::mem::size_of::<BBox3f>(), 24);
    }
}
