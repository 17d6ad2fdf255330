//! Vertex normal and tangent generation for meshes that ship without them.

use glam::{Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// Default crease angle (degrees) used when generating missing normals.
pub const DEFAULT_SMOOTH_ANGLE: f32 = 60.0;

/// Corner data grouped by quantized position, so split vertices along
/// UV seams still smooth across each other.
#[derive(Clone)]
pub struct SmoothNormalData {
    /// Position hash -> list of (vertex_index, face_normal)
    position_groups: HashMap<(i32, i32, i32), Vec<(usize, Vec3)>>,
    /// Number of vertices
    vertex_count: usize,
}

impl SmoothNormalData {
    /// Build corner data from an indexed triangle list.
    pub fn from_triangles(positions: &[Vec3], indices: &[u32]) -> Self {
        let mut position_groups: HashMap<(i32, i32, i32), Vec<(usize, Vec3)>> = HashMap::new();

        for tri in indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= positions.len() || b >= positions.len() || c >= positions.len() {
                continue;
            }
            // Area-weighted: the unnormalized cross product
            let face_n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
            for idx in [a, b, c] {
                position_groups
                    .entry(pos_key(positions[idx]))
                    .or_default()
                    .push((idx, face_n));
            }
        }

        Self {
            position_groups,
            vertex_count: positions.len(),
        }
    }

    /// Per-vertex normals, only averaging faces within `angle_deg` of each other.
    pub fn calculate(&self, angle_deg: f32) -> Vec<Vec3> {
        let cos_threshold = angle_deg.to_radians().cos();
        let mut sums = vec![Vec3::ZERO; self.vertex_count];

        for group in self.position_groups.values() {
            for &(idx, face_n) in group {
                let dir = face_n.normalize_or_zero();
                let mut sum = Vec3::ZERO;
                for &(_, other_n) in group {
                    if dir.dot(other_n.normalize_or_zero()) >= cos_threshold {
                        sum += other_n;
                    }
                }
                sums[idx] += sum.normalize_or_zero();
            }
        }

        sums.into_iter()
            .map(|n| {
                let n = n.normalize_or_zero();
                if n == Vec3::ZERO { Vec3::Y } else { n }
            })
            .collect()
    }
}

fn pos_key(p: Vec3) -> (i32, i32, i32) {
    let scale = 10000.0;
    (
        (p.x * scale).round() as i32,
        (p.y * scale).round() as i32,
        (p.z * scale).round() as i32,
    )
}

/// Per-vertex tangents (xyz) with handedness in w, from UV derivatives.
pub fn compute_tangents(positions: &[Vec3], normals: &[Vec3], uvs: &[Vec2], indices: &[u32]) -> Vec<Vec4> {
    let n = positions.len();
    let mut tan = vec![Vec3::ZERO; n];
    let mut bitan = vec![Vec3::ZERO; n];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= n || b >= n || c >= n || uvs.len() < n {
            continue;
        }
        let e1 = positions[b] - positions[a];
        let e2 = positions[c] - positions[a];
        let d1 = uvs[b] - uvs[a];
        let d2 = uvs[c] - uvs[a];
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let b_ = (e2 * d1.x - e1 * d2.x) * r;
        for idx in [a, b, c] {
            tan[idx] += t;
            bitan[idx] += b_;
        }
    }

    (0..n)
        .map(|i| {
            let normal = normals.get(i).copied().unwrap_or(Vec3::Y);
            // Gram-Schmidt against the normal
            let mut t = (tan[i] - normal * normal.dot(tan[i])).normalize_or_zero();
            if t == Vec3::ZERO {
                t = normal.any_orthonormal_vector();
            }
            let w = if normal.cross(t).dot(bitan[i]) < 0.0 { -1.0 } else { 1.0 };
            t.extend(w)
        })
        .collect()
}
