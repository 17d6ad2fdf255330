//! Geometry collection: which meshes of the selection get baked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::scene::{MaterialId, Mesh, NodeId, RendererKind, Scene};
use crate::util::{BBox3f, Mat4};

/// One renderer's mesh as it will be baked.
#[derive(Clone, Debug)]
pub struct MeshInstance {
    pub node: NodeId,
    /// Shared static mesh, or a posed snapshot for skinned renderers.
    pub mesh: Arc<Mesh>,
    pub transform: Mat4,
    pub material: Option<MaterialId>,
    /// Output name candidate: `"<parent>_<renderer>"` or `"<renderer>"`.
    pub name: String,
    pub bounds: BBox3f,
}

/// Collector output, statics and skinned kept apart.
#[derive(Clone, Debug, Default)]
pub struct Collected {
    pub statics: Vec<MeshInstance>,
    pub skinned: Vec<MeshInstance>,
    /// Renderers dropped by LOD de-duplication.
    pub lod_removed: Vec<NodeId>,
}

impl Collected {
    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.skinned.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statics.len() + self.skinned.len()
    }

    /// Statics first, then skinned.
    pub fn instances(&self) -> impl Iterator<Item = &MeshInstance> {
        self.statics.iter().chain(&self.skinned)
    }

    /// Union of every instance's world bounds.
    pub fn bounds(&self) -> BBox3f {
        let mut b = BBox3f::EMPTY;
        for inst in self.instances() {
            b.expand_by_box(&inst.bounds);
        }
        b
    }
}

/// Gather the renderers under `selection`, drop LOD duplicates and build
/// bakeable instances.
pub fn collect(scene: &Scene, selection: &[NodeId]) -> Collected {
    let mut seen = HashSet::new();
    let mut statics = Vec::new();
    let mut skinned = Vec::new();
    for &root in selection {
        for id in scene.subtree(root) {
            let Some(renderer) = scene.renderer(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            if renderer.is_skinned() {
                skinned.push(id);
            } else {
                statics.push(id);
            }
        }
    }

    let mut lod_removed = remove_lod_duplicates(scene, &mut statics);
    lod_removed.extend(remove_lod_duplicates(scene, &mut skinned));
    if !lod_removed.is_empty() {
        let lines: Vec<String> = lod_removed.iter().map(|&id| scene.display_path(id)).collect();
        tracing::info!(
            "Removing renderers since they are in LOD groups and share materials with previous entries:\n{}",
            lines.join("\n")
        );
    }

    Collected {
        statics: statics.into_iter().filter_map(|id| instance(scene, id)).collect(),
        skinned: skinned.into_iter().filter_map(|id| instance(scene, id)).collect(),
        lod_removed,
    }
}

/// Within each LOD group, drop renderers whose materials all appeared on an
/// earlier renderer of the same group. Returns the dropped nodes.
pub fn remove_lod_duplicates(scene: &Scene, renderers: &mut Vec<NodeId>) -> Vec<NodeId> {
    let mut group_materials: HashMap<NodeId, SmallVec<[MaterialId; 8]>> = HashMap::new();
    let mut removed = Vec::new();
    renderers.retain(|&id| {
        let Some(group) = scene.lod_group_of(id) else {
            return true;
        };
        let Some(renderer) = scene.renderer(id) else {
            return true;
        };
        let seen = group_materials.entry(group).or_default();
        let mut all_seen = true;
        for &m in &renderer.materials {
            if !seen.contains(&m) {
                all_seen = false;
                seen.push(m);
            }
        }
        if all_seen {
            removed.push(id);
        }
        !all_seen
    });
    removed
}

/// Output name candidate for a renderer node.
pub fn instance_name(scene: &Scene, id: NodeId) -> String {
    let node = scene.node(id);
    match node.parent() {
        Some(p) => format!("{}_{}", scene.node(p).name, node.name),
        None => node.name.clone(),
    }
}

fn instance(scene: &Scene, id: NodeId) -> Option<MeshInstance> {
    let renderer = scene.renderer(id)?;
    let mesh = match &renderer.kind {
        RendererKind::Static { mesh } => mesh.clone()?,
        RendererKind::Skinned { mesh, bones } => Arc::new(mesh.as_ref()?.snapshot(bones)),
    };
    let transform = scene.world_transform(id);
    Some(MeshInstance {
        node: id,
        bounds: mesh.bounds().transformed(&transform),
        mesh,
        transform,
        material: renderer.shared_material(),
        name: instance_name(scene, id),
    })
}
