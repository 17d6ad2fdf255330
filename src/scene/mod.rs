//! In-memory host scene: nodes, renderers, materials.
//!
//! The host fills a [`Scene`] with its hierarchy, then hands the baker a
//! selection of root nodes. Renderers carry their mesh and material slots;
//! nodes flagged as LOD groups scope the LOD de-duplication.

mod guard;
mod mesh;
mod normals;
mod texture;
pub mod desc;

pub use guard::RendererStateGuard;
pub use mesh::{Mesh, SkinWeights, MAX_UV_CHANNELS};
pub use normals::{compute_tangents, SmoothNormalData, DEFAULT_SMOOTH_ANGLE};
pub use texture::Texture;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::util::{BBox3f, Error, Mat4, Result};

/// Material property holding a tangent-space normal map.
pub const NORMAL_MAP_PROPERTY: &str = "_NormalTex";
/// Older name for the same slot, checked when the primary one is absent.
pub const LEGACY_NORMAL_MAP_PROPERTY: &str = "_BumpMap";

/// Index of a node in its [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a material in its [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(usize);

impl MaterialId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Face culling a material renders with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    Off,
    #[default]
    Back,
    Front,
}

/// Surface material. Only what baking needs: a render-type tag for
/// replacement rendering, the cull mode, and named texture slots.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    /// Replacement depth rendering only draws tagged materials.
    pub render_type: Option<String>,
    pub cull: CullMode,
    /// Declared texture properties; `None` means declared but unassigned.
    textures: BTreeMap<String, Option<Arc<Texture>>>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            render_type: Some("Opaque".to_string()),
            cull: CullMode::Back,
            textures: BTreeMap::new(),
        }
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }

    pub fn with_render_type(mut self, tag: Option<String>) -> Self {
        self.render_type = tag;
        self
    }

    pub fn with_texture(mut self, property: impl Into<String>, texture: Option<Arc<Texture>>) -> Self {
        self.textures.insert(property.into(), texture);
        self
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.textures.contains_key(property)
    }

    pub fn texture(&self, property: &str) -> Option<&Arc<Texture>> {
        self.textures.get(property).and_then(Option::as_ref)
    }

    /// Normal map slot: the primary property if declared, else the legacy one.
    pub fn normal_map(&self) -> Option<&Arc<Texture>> {
        if self.has_property(NORMAL_MAP_PROPERTY) {
            self.texture(NORMAL_MAP_PROPERTY)
        } else if self.has_property(LEGACY_NORMAL_MAP_PROPERTY) {
            self.texture(LEGACY_NORMAL_MAP_PROPERTY)
        } else {
            None
        }
    }
}

/// What a renderer draws.
#[derive(Clone, Debug)]
pub enum RendererKind {
    Static { mesh: Option<Arc<Mesh>> },
    /// Deforming mesh with its current skinning matrices.
    Skinned { mesh: Option<Arc<Mesh>>, bones: Vec<Mat4> },
}

/// Mesh-bearing component of a node.
#[derive(Clone, Debug)]
pub struct Renderer {
    pub kind: RendererKind,
    pub materials: SmallVec<[MaterialId; 4]>,
    pub enabled: bool,
}

impl Renderer {
    pub fn new_static(mesh: Arc<Mesh>, materials: impl IntoIterator<Item = MaterialId>) -> Self {
        Self {
            kind: RendererKind::Static { mesh: Some(mesh) },
            materials: materials.into_iter().collect(),
            enabled: true,
        }
    }

    pub fn new_skinned(mesh: Arc<Mesh>, bones: Vec<Mat4>, materials: impl IntoIterator<Item = MaterialId>) -> Self {
        Self {
            kind: RendererKind::Skinned { mesh: Some(mesh), bones },
            materials: materials.into_iter().collect(),
            enabled: true,
        }
    }

    /// First material slot.
    pub fn shared_material(&self) -> Option<MaterialId> {
        self.materials.first().copied()
    }

    pub fn is_skinned(&self) -> bool {
        matches!(self.kind, RendererKind::Skinned { .. })
    }

    pub fn mesh(&self) -> Option<&Arc<Mesh>> {
        match &self.kind {
            RendererKind::Static { mesh } | RendererKind::Skinned { mesh, .. } => mesh.as_ref(),
        }
    }

    /// Geometry as currently rendered: the shared mesh, or a posed snapshot.
    pub fn posed_mesh(&self) -> Option<Arc<Mesh>> {
        match &self.kind {
            RendererKind::Static { mesh } => mesh.clone(),
            RendererKind::Skinned { mesh, bones } => mesh.as_ref().map(|m| Arc::new(m.snapshot(bones))),
        }
    }
}

/// Scene graph node.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub local: Mat4,
    pub lod_group: bool,
    pub renderer: Option<Renderer>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Flat arena of nodes and materials.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    nodes: Vec<Node>,
    materials: Vec<Material>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    /// Panics if `id` is not from this scene; see [`Scene::get_material`].
    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    /// `None` for an id that belongs to another scene.
    pub fn get_material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn num_materials(&self) -> usize {
        self.materials.len()
    }

    /// Append a node under `parent` (or as a root).
    pub fn add_node(&mut self, name: impl Into<String>, parent: Option<NodeId>, local: Mat4) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            parent,
            children: Vec::new(),
            local,
            lod_group: false,
            renderer: None,
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    /// Convenience: node with a renderer attached.
    pub fn add_renderer(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
        local: Mat4,
        renderer: Renderer,
    ) -> NodeId {
        let id = self.add_node(name, parent, local);
        self.nodes[id.0].renderer = Some(renderer);
        id
    }

    pub fn set_lod_group(&mut self, id: NodeId, lod_group: bool) {
        self.nodes[id.0].lod_group = lod_group;
    }

    /// Panics if `id` is not from this scene; see [`Scene::get_node`].
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Error naming the first id in `ids` this scene does not hold.
    pub fn check_nodes(&self, ids: &[NodeId]) -> Result<()> {
        match ids.iter().find(|&&id| !self.contains(id)) {
            Some(id) => Err(Error::scene(format!(
                "node {} is not part of this scene ({} nodes)",
                id.0,
                self.nodes.len()
            ))),
            None => Ok(()),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn renderer(&self, id: NodeId) -> Option<&Renderer> {
        self.nodes.get(id.0).and_then(|n| n.renderer.as_ref())
    }

    /// First node with this name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Like [`Scene::find`] but an error when absent.
    pub fn require(&self, name: &str) -> Result<NodeId> {
        self.find(name).ok_or_else(|| Error::scene(format!("no node named '{name}'")))
    }

    /// Nodes that carry a renderer, in creation order.
    pub fn renderer_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.renderer.is_some())
            .map(|(i, _)| NodeId(i))
    }

    pub fn world_transform(&self, id: NodeId) -> Mat4 {
        let node = &self.nodes[id.0];
        match node.parent {
            Some(p) => self.world_transform(p) * node.local,
            None => node.local,
        }
    }

    /// `root` and its descendants, depth-first pre-order. Empty when `root`
    /// is not in this scene.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Nearest LOD group at or above `id`.
    pub fn lod_group_of(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if self.nodes[c.0].lod_group {
                return Some(c);
            }
            cur = self.nodes[c.0].parent;
        }
        None
    }

    /// `"parent/name"` or `"name"`, for diagnostics.
    pub fn display_path(&self, id: NodeId) -> String {
        let node = &self.nodes[id.0];
        match node.parent {
            Some(p) => format!("{}/{}", self.nodes[p.0].name, node.name),
            None => node.name.clone(),
        }
    }

    /// World-space bounds of a renderer's current geometry.
    pub fn world_bounds(&self, id: NodeId) -> Option<BBox3f> {
        let mesh = self.renderer(id)?.posed_mesh()?;
        Some(mesh.bounds().transformed(&self.world_transform(id)))
    }

    pub(crate) fn set_enabled(&mut self, id: NodeId, enabled: bool) {
        if let Some(r) = self.nodes[id.0].renderer.as_mut() {
            r.enabled = enabled;
        }
    }
}
