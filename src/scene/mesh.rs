//! Triangle meshes as the baker sees them.

use std::borrow::Cow;

use crate::util::{BBox3f, Mat3, Mat4, Vec2, Vec3, Vec4};
use super::normals::{compute_tangents, SmoothNormalData, DEFAULT_SMOOTH_ANGLE};

/// Number of texture coordinate sets a mesh may carry.
pub const MAX_UV_CHANNELS: usize = 4;

/// Up to four bone influences per vertex.
#[derive(Clone, Debug, Default)]
pub struct SkinWeights {
    pub bones: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}

/// Indexed triangle mesh in object space.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Empty when the source had none; see [`Mesh::vertex_normals`].
    pub normals: Vec<Vec3>,
    /// Tangent xyz + handedness w. Empty when the source had none.
    pub tangents: Vec<Vec4>,
    pub uvs: [Vec<Vec2>; MAX_UV_CHANNELS],
    /// Triangle list.
    pub indices: Vec<u32>,
    pub skin: Option<SkinWeights>,
}

impl Mesh {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            positions,
            indices,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<Vec4>) -> Self {
        self.tangents = tangents;
        self
    }

    /// Set a UV channel. Channels past `MAX_UV_CHANNELS` are ignored.
    pub fn with_uv(mut self, channel: usize, uvs: Vec<Vec2>) -> Self {
        if let Some(slot) = self.uvs.get_mut(channel) {
            *slot = uvs;
        }
        self
    }

    pub fn with_skin(mut self, skin: SkinWeights) -> Self {
        self.skin = Some(skin);
        self
    }

    /// Remap channel 0 from the unit square into `[min, max]`.
    pub fn with_uv_rect(mut self, min: Vec2, max: Vec2) -> Self {
        for uv in &mut self.uvs[0] {
            *uv = min + *uv * (max - min);
        }
        self
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// Has positions and a well-formed triangle list.
    pub fn is_valid(&self) -> bool {
        !self.positions.is_empty()
            && !self.indices.is_empty()
            && self.indices.len() % 3 == 0
            && self.indices.iter().all(|&i| (i as usize) < self.positions.len())
    }

    /// Triangle corner indices.
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
    }

    /// UV channel if it has one coordinate per vertex.
    pub fn uv(&self, channel: usize) -> Option<&[Vec2]> {
        self.uvs
            .get(channel)
            .filter(|uvs| uvs.len() == self.positions.len())
            .map(Vec::as_slice)
    }

    pub fn bounds(&self) -> BBox3f {
        BBox3f::from_points(self.positions.iter().copied())
    }

    /// Source normals, or generated smooth normals when the mesh has none.
    pub fn vertex_normals(&self) -> Cow<'_, [Vec3]> {
        if self.normals.len() == self.positions.len() {
            Cow::Borrowed(&self.normals)
        } else {
            Cow::Owned(SmoothNormalData::from_triangles(&self.positions, &self.indices).calculate(DEFAULT_SMOOTH_ANGLE))
        }
    }

    /// Source tangents, or tangents derived from UV0.
    pub fn vertex_tangents(&self) -> Cow<'_, [Vec4]> {
        if self.tangents.len() == self.positions.len() {
            return Cow::Borrowed(&self.tangents);
        }
        let normals = self.vertex_normals();
        let uvs = self.uv(0).unwrap_or(&[]);
        Cow::Owned(compute_tangents(&self.positions, &normals, uvs, &self.indices))
    }

    /// Static copy of this mesh posed by linear-blend skinning.
    ///
    /// `bones` are skinning matrices (bind pose already folded in) in the
    /// renderer's local space. Vertices without weights keep their rest pose.
    pub fn snapshot(&self, bones: &[Mat4]) -> Mesh {
        let normals = self.vertex_normals();
        let tangents = self.vertex_tangents();
        let mut out = Mesh {
            name: format!("{}_snapshot", self.name),
            positions: Vec::with_capacity(self.positions.len()),
            normals: Vec::with_capacity(self.positions.len()),
            tangents: Vec::with_capacity(self.positions.len()),
            uvs: self.uvs.clone(),
            indices: self.indices.clone(),
            skin: None,
        };

        for (i, &p) in self.positions.iter().enumerate() {
            let m = self.skin_matrix(i, bones);
            let linear = Mat3::from_mat4(m);
            out.positions.push(m.transform_point3(p));
            out.normals.push((linear * normals[i]).normalize_or_zero());
            let t = tangents[i];
            out.tangents.push((linear * t.truncate()).normalize_or_zero().extend(t.w));
        }
        out
    }

    fn skin_matrix(&self, vertex: usize, bones: &[Mat4]) -> Mat4 {
        let Some(skin) = &self.skin else {
            return Mat4::IDENTITY;
        };
        let (Some(ids), Some(weights)) = (skin.bones.get(vertex), skin.weights.get(vertex)) else {
            return Mat4::IDENTITY;
        };
        let mut m = Mat4::ZERO;
        let mut total = 0.0;
        for (&b, &w) in ids.iter().zip(weights) {
            if w <= 0.0 {
                continue;
            }
            if let Some(bone) = bones.get(b as usize) {
                m += *bone * w;
                total += w;
            }
        }
        if total <= 0.0 { Mat4::IDENTITY } else { m * (1.0 / total) }
    }

    /// Unit-square quad in the XZ plane facing +Y, UV0 spanning [0,1]².
    pub fn quad(size: f32) -> Mesh {
        let h = size * 0.5;
        Mesh::new(
            "Quad",
            vec![
                Vec3::new(-h, 0.0, h),
                Vec3::new(h, 0.0, h),
                Vec3::new(h, 0.0, -h),
                Vec3::new(-h, 0.0, -h),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
        .with_normals(vec![Vec3::Y; 4])
        .with_tangents(vec![Vec4::new(1.0, 0.0, 0.0, 1.0); 4])
        .with_uv(0, vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)])
    }

    /// Axis-aligned cube centred on the origin; every face maps the full UV square.
    pub fn cube(size: f32) -> Mesh {
        let h = size * 0.5;
        // (normal, u axis, v axis) with u x v = normal
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut mesh = Mesh {
            name: "Cube".to_string(),
            ..Default::default()
        };
        for (face, (n, u, v)) in faces.iter().enumerate() {
            let base = (face * 4) as u32;
            for &(cu, cv) in &corners {
                mesh.positions.push((*n + *u * cu + *v * cv) * h);
                mesh.normals.push(*n);
                mesh.tangents.push(u.extend(1.0));
                mesh.uvs[0].push(Vec2::new((cu + 1.0) * 0.5, (cv + 1.0) * 0.5));
            }
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }
}
