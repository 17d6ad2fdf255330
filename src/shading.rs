//! Per-texel kernels.
//!
//! Pure functions of their inputs, shared by every backend pass that runs
//! them. Colours are linear; normals are encoded `n * 0.5 + 0.5`.

use crate::config::{NormalsConversionMode, NormalsSpace};
use crate::util::{Mat3, Vec3, Vec4};

/// Cap on the depth slope (depth units per texel) used for biasing.
pub const MAX_DEPTH_SLOPE: f32 = 64.0;

/// Quantity integrated over the sample directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrand {
    BentNormal,
    AmbientOcclusion,
}

#[inline]
pub fn encode_normal(n: Vec3) -> Vec3 {
    n * 0.5 + Vec3::splat(0.5)
}

#[inline]
pub fn decode_normal(c: Vec3) -> Vec3 {
    c * 2.0 - Vec3::ONE
}

/// Orthonormal frame from an interpolated vertex normal and tangent.
///
/// Returns (T, B, N). The tangent is re-orthogonalized against N and B
/// carries the tangent handedness.
pub fn tangent_frame(normal: Vec3, tangent: Vec4) -> (Vec3, Vec3, Vec3) {
    let n = normal.normalize_or(Vec3::Y);
    let mut t = (tangent.truncate() - n * n.dot(tangent.truncate())).normalize_or_zero();
    if t == Vec3::ZERO {
        t = n.any_orthonormal_vector();
    }
    let w = if tangent.w < 0.0 { -1.0 } else { 1.0 };
    (t, n.cross(t) * w, n)
}

/// Perturb `normal` by a tangent-space normal map texel.
pub fn apply_tangent_normal_map(normal: Vec3, tangent: Vec4, texel: Vec4) -> Vec3 {
    let (t, b, n) = tangent_frame(normal, tangent);
    let m = decode_normal(texel.truncate());
    (t * m.x + b * m.y + n * m.z).normalize_or(n)
}

/// `1` when the direction is in the texel's upper hemisphere (or clamping
/// is off), else `0`.
#[inline]
pub fn hemisphere(normal: Vec3, direction: Vec3, clamp: bool) -> f32 {
    if clamp && normal.dot(direction) < 0.0 { 0.0 } else { 1.0 }
}

/// One direction's contribution to a covered texel.
#[inline]
pub fn sample_contribution(integrand: Integrand, direction: Vec3, lit: f32, hemi: f32) -> Vec4 {
    match integrand {
        Integrand::BentNormal => (direction * (lit * hemi)).extend(1.0),
        Integrand::AmbientOcclusion => Vec4::new(lit * hemi, hemi, 0.0, 1.0),
    }
}

/// `(prev * i + c) / (i + 1)`: average of samples `0..=i`.
#[inline]
pub fn running_average(prev: Vec4, contribution: Vec4, index: u32) -> Vec4 {
    let i = index as f32;
    (prev * i + contribution) / (i + 1.0)
}

/// Depth bias for a surface with shadow-space normal `n`.
///
/// `texel` is one depth-map texel in shadow units.
pub fn slope_bias(shadow_bias: f32, n: Vec3, texel: f32) -> f32 {
    let slope = if n.z.abs() <= f32::EPSILON {
        MAX_DEPTH_SLOPE
    } else {
        ((n.x.abs() + n.y.abs()) / n.z.abs()).min(MAX_DEPTH_SLOPE)
    };
    shadow_bias + texel * slope
}

/// Shadow test. `stored` is `None` outside the depth map, which counts as lit.
#[inline]
pub fn visibility(depth: f32, stored: Option<f32>, bias: f32, reversed_z: bool) -> f32 {
    let lit = match stored {
        None => true,
        Some(s) if reversed_z => depth >= s - bias,
        Some(s) => depth <= s + bias,
    };
    if lit { 1.0 } else { 0.0 }
}

/// Schlick bias curve. `a = 0.5` is the identity.
#[inline]
pub fn schlick_bias(v: f32, a: f32) -> f32 {
    let a = a.clamp(0.001, 0.999);
    v / ((1.0 / a - 2.0) * (1.0 - v) + 1.0)
}

/// Final AO texel from an accumulated `(lit, hemi)` pair.
pub fn ao_post(acc: Vec4, ao_bias: f32) -> Vec4 {
    let v = if acc.y > 0.0 { (acc.x / acc.y).clamp(0.0, 1.0) } else { 1.0 };
    let o = schlick_bias(v, ao_bias);
    Vec4::new(o, o, o, 1.0)
}

/// Surface basis of a post-processed fragment.
#[derive(Clone, Copy, Debug)]
pub struct Fragment {
    /// Object to world, linear part.
    pub linear: Mat3,
    /// Interpolated object-space vertex normal.
    pub normal: Vec3,
    /// Interpolated object-space vertex tangent with handedness.
    pub tangent: Vec4,
}

impl Fragment {
    fn world_frame(&self) -> (Vec3, Vec3, Vec3) {
        let normal_matrix = self.linear.inverse().transpose();
        let n = (normal_matrix * self.normal).normalize_or(Vec3::Y);
        let t = (self.linear * self.tangent.truncate()).extend(self.tangent.w);
        tangent_frame(n, t)
    }
}

/// Final bent-normal texel. `cached` is the world normal from the data cache.
pub fn bent_normal_post(acc: Vec4, cached: Vec3, frag: &Fragment, space: NormalsSpace) -> Vec4 {
    let bent = acc.truncate().try_normalize().unwrap_or_else(|| cached.normalize_or(Vec3::Y));
    let out = match space {
        NormalsSpace::World => bent,
        NormalsSpace::Object => (frag.linear.transpose() * bent).normalize_or(bent),
        NormalsSpace::Tangent => {
            let (t, b, n) = frag.world_frame();
            Vec3::new(bent.dot(t), bent.dot(b), bent.dot(n))
        }
    };
    encode_normal(out).extend(1.0)
}

/// Final conversion texel. `cached` is the object-space source normal.
pub fn conversion_post(cached: Vec3, frag: &Fragment, mode: NormalsConversionMode) -> Vec4 {
    let n_obj = cached.normalize_or(frag.normal);
    let out = match mode {
        NormalsConversionMode::TangentToObject => n_obj,
        NormalsConversionMode::ObjectToTangent => {
            let (t, b, n) = tangent_frame(frag.normal, frag.tangent);
            Vec3::new(n_obj.dot(t), n_obj.dot(b), n_obj.dot(n))
        }
    };
    encode_normal(out).extend(1.0)
}

/// One dilation step for the texel whose 3x3 neighbourhood is `window`
/// (centre at index 4, out-of-bounds entries `None`).
pub fn dilate_texel(window: &[Option<Vec4>; 9]) -> Vec4 {
    let centre = window[4].unwrap_or(Vec4::ZERO);
    if centre.w > 0.0 {
        return centre;
    }
    let mut sum = Vec4::ZERO;
    let mut count = 0u32;
    for (i, texel) in window.iter().enumerate() {
        if i == 4 {
            continue;
        }
        if let Some(t) = texel.filter(|t| t.w > 0.0) {
            sum += t;
            count += 1;
        }
    }
    if count == 0 { centre } else { sum / count as f32 }
}

/// Porter-Duff "over".
#[inline]
pub fn composite_over(src: Vec4, dst: Vec4) -> Vec4 {
    let a = src.w;
    let rgb = src.truncate() * a + dst.truncate() * (1.0 - a);
    rgb.extend(a + dst.w * (1.0 - a))
}
