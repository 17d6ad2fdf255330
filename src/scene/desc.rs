//! JSON scene description, used by the CLI to build a [`Scene`].
//!
//! ```json
//! {
//!   "materials": [{ "name": "Rock", "normal_map": "rock_n.png" }],
//!   "nodes": [
//!     { "name": "Ground", "mesh": { "type": "quad", "size": 10.0 }, "materials": ["Rock"] },
//!     { "name": "Box", "translation": [0, 0.5, 0], "mesh": { "type": "cube" }, "materials": ["Rock"] }
//!   ],
//!   "selection": ["Box"]
//! }
//! ```
//!
//! Node parents must appear before their children. Relative image paths are
//! resolved against the description file's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{CullMode, Material, MaterialId, Mesh, NodeId, Renderer, Scene, Texture, NORMAL_MAP_PROPERTY};
use crate::util::{Error, Mat4, Quat, Result, Vec2, Vec3};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDesc {
    pub materials: Vec<MaterialDesc>,
    pub nodes: Vec<NodeDesc>,
    /// Names of the selected roots. Empty selects every root node.
    pub selection: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterialDesc {
    pub name: String,
    #[serde(default)]
    pub cull: CullMode,
    #[serde(default = "default_render_type")]
    pub render_type: Option<String>,
    #[serde(default)]
    pub normal_map: Option<PathBuf>,
}

fn default_render_type() -> Option<String> {
    Some("Opaque".to_string())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDesc {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub translation: [f32; 3],
    /// Quaternion `[x, y, z, w]`.
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
    #[serde(default)]
    pub lod_group: bool,
    #[serde(default)]
    pub mesh: Option<MeshDesc>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

fn enabled() -> bool {
    true
}

fn unit_size() -> f32 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MeshDesc {
    Quad {
        #[serde(default = "unit_size")]
        size: f32,
        /// Remap UV0 into `[min, max]`.
        #[serde(default)]
        uv_rect: Option<[[f32; 2]; 2]>,
    },
    Cube {
        #[serde(default = "unit_size")]
        size: f32,
    },
    Inline {
        positions: Vec<[f32; 3]>,
        indices: Vec<u32>,
        #[serde(default)]
        normals: Vec<[f32; 3]>,
        /// Channel 0 first.
        #[serde(default)]
        uvs: Vec<Vec<[f32; 2]>>,
    },
}

impl MeshDesc {
    fn build(&self, name: &str) -> Result<Mesh> {
        let mesh = match self {
            MeshDesc::Quad { size, uv_rect } => {
                let mut m = Mesh::quad(*size);
                if let Some([min, max]) = uv_rect {
                    m = m.with_uv_rect(Vec2::from_array(*min), Vec2::from_array(*max));
                }
                m
            }
            MeshDesc::Cube { size } => Mesh::cube(*size),
            MeshDesc::Inline { positions, indices, normals, uvs } => {
                let mut m = Mesh::new(
                    name,
                    positions.iter().copied().map(Vec3::from_array).collect(),
                    indices.clone(),
                )
                .with_normals(normals.iter().copied().map(Vec3::from_array).collect());
                for (channel, set) in uvs.iter().enumerate() {
                    m = m.with_uv(channel, set.iter().copied().map(Vec2::from_array).collect());
                }
                m
            }
        };
        if !mesh.is_valid() {
            return Err(Error::scene(format!("mesh of node '{name}' is not a valid triangle list")));
        }
        Ok(mesh)
    }
}

impl SceneDesc {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build the scene and resolve the selection.
    pub fn build(&self, base_dir: &Path) -> Result<(Scene, Vec<NodeId>)> {
        let mut scene = Scene::new();
        let mut materials: HashMap<&str, MaterialId> = HashMap::new();

        for desc in &self.materials {
            let mut material = Material::new(&desc.name)
                .with_cull(desc.cull)
                .with_render_type(desc.render_type.clone());
            if let Some(path) = &desc.normal_map {
                let texture = Texture::load(base_dir.join(path))?;
                material = material.with_texture(NORMAL_MAP_PROPERTY, Some(Arc::new(texture)));
            }
            materials.insert(desc.name.as_str(), scene.add_material(material));
        }

        let mut nodes: HashMap<&str, NodeId> = HashMap::new();
        for desc in &self.nodes {
            let parent = match &desc.parent {
                Some(p) => Some(
                    *nodes
                        .get(p.as_str())
                        .ok_or_else(|| Error::scene(format!("node '{}' has unknown parent '{p}'", desc.name)))?,
                ),
                None => None,
            };
            let local = Mat4::from_scale_rotation_translation(
                Vec3::from_array(desc.scale),
                Quat::from_array(desc.rotation).normalize(),
                Vec3::from_array(desc.translation),
            );
            let id = scene.add_node(&desc.name, parent, local);
            scene.set_lod_group(id, desc.lod_group);

            if let Some(mesh) = &desc.mesh {
                let mesh = Arc::new(mesh.build(&desc.name)?);
                let slots = desc
                    .materials
                    .iter()
                    .map(|m| {
                        materials
                            .get(m.as_str())
                            .copied()
                            .ok_or_else(|| Error::scene(format!("node '{}' uses unknown material '{m}'", desc.name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut renderer = Renderer::new_static(mesh, slots);
                renderer.enabled = desc.enabled;
                scene.node_mut(id).renderer = Some(renderer);
            }
            nodes.insert(desc.name.as_str(), id);
        }

        let selection = if self.selection.is_empty() {
            (0..scene.num_nodes())
                .map(NodeId)
                .filter(|&id| scene.node(id).parent().is_none())
                .collect()
        } else {
            self.selection.iter().map(|name| scene.require(name)).collect::<Result<Vec<_>>>()?
        };
        Ok((scene, selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESC: &str = r#"{
        "materials": [{ "name": "A" }, { "name": "B", "cull": "Off" }],
        "nodes": [
            { "name": "Root", "lod_group": true },
            { "name": "Ground", "parent": "Root", "mesh": { "type": "quad", "size": 4.0 }, "materials": ["A"] },
            { "name": "Box", "parent": "Root", "translation": [0, 0.5, 0],
              "mesh": { "type": "cube" }, "materials": ["B"] },
            { "name": "Tri", "mesh": { "type": "inline", "positions": [[0,0,0],[1,0,0],[0,0,-1]], "indices": [0,1,2],
              "uvs": [[[0,0],[1,0],[0,1]]] } }
        ]
    }"#;

    #[test]
    fn test_build_hierarchy() {
        let desc: SceneDesc = serde_json::from_str(DESC).unwrap();
        let (scene, selection) = desc.build(Path::new(".")).unwrap();
        assert_eq!(scene.num_nodes(), 4);
        assert_eq!(scene.num_materials(), 2);
        // Both parentless nodes
        assert_eq!(selection.len(), 2);

        let b = scene.find("Box").unwrap();
        assert_eq!(scene.display_path(b), "Root/Box");
        assert_eq!(scene.world_transform(b).transform_point3(Vec3::ZERO), Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(scene.material(scene.renderer(b).unwrap().materials[0]).cull, CullMode::Off);

        let tri = scene.renderer(scene.find("Tri").unwrap()).unwrap();
        assert!(tri.mesh().unwrap().uv(0).is_some());
    }

    #[test]
    fn test_unknown_material_rejected() {
        let desc: SceneDesc = serde_json::from_str(
            r#"{ "nodes": [{ "name": "X", "mesh": { "type": "cube" }, "materials": ["Nope"] }] }"#,
        )
        .unwrap();
        let err = desc.build(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_explicit_selection() {
        let mut desc: SceneDesc = serde_json::from_str(DESC).unwrap();
        desc.selection = vec!["Box".into()];
        let (scene, selection) = desc.build(Path::new(".")).unwrap();
        assert_eq!(selection, vec![scene.find("Box").unwrap()]);

        desc.selection = vec!["Missing".into()];
        assert!(desc.build(Path::new(".")).is_err());
    }
}
