//! Partitioning instances into bake groups (one output texture each).

use super::collect::{Collected, MeshInstance};
use crate::render::{RenderBackend, TargetFormat, TargetId, TargetLedger};
use crate::scene::MaterialId;
use crate::util::Result;

/// Instances sharing one output texture are keyed by material.
/// `None` is a renderer without materials.
pub type GroupKey = Option<MaterialId>;

/// A planned group before any target exists.
#[derive(Clone, Debug)]
pub struct GroupPlan {
    pub key: GroupKey,
    pub instances: Vec<MeshInstance>,
}

/// A group with its render targets.
#[derive(Debug)]
pub struct BakeGroup {
    pub key: GroupKey,
    pub instances: Vec<MeshInstance>,
    pub position_cache: TargetId,
    pub normal_cache: TargetId,
    pub result: TargetId,
}

/// Assign every instance to a group, statics first.
///
/// With `force_shared` all instances land in one group keyed by the first
/// instance's material. Group order is first-encounter order.
pub fn plan_groups(collected: &Collected, force_shared: bool) -> Vec<GroupPlan> {
    let mut groups: Vec<GroupPlan> = Vec::new();
    for inst in collected.instances() {
        let key = match (force_shared, groups.first()) {
            (true, Some(first)) => first.key,
            _ => inst.material,
        };
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.instances.push(inst.clone()),
            None => groups.push(GroupPlan {
                key,
                instances: vec![inst.clone()],
            }),
        }
    }
    groups
}

/// Allocate the three targets of every planned group.
pub fn allocate<B: RenderBackend + ?Sized>(
    plans: Vec<GroupPlan>,
    size: u32,
    backend: &mut B,
    ledger: &mut TargetLedger,
) -> Result<Vec<BakeGroup>> {
    plans
        .into_iter()
        .map(|plan| {
            Ok(BakeGroup {
                position_cache: ledger.create(backend, "position_cache", size, TargetFormat::Color)?,
                normal_cache: ledger.create(backend, "normal_cache", size, TargetFormat::Color)?,
                result: ledger.create(backend, "result", size, TargetFormat::Color)?,
                key: plan.key,
                instances: plan.instances,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::collect::collect;
    use crate::render::SoftwareBackend;
    use crate::scene::{Material, Mesh, Renderer, Scene};
    use crate::util::Mat4;
    use std::sync::Arc;

    /// Statics: s1(A) s2(B) s3(A); skinned: k1(B) k2(C)
    fn scene() -> (Scene, Vec<crate::scene::NodeId>, [MaterialId; 3]) {
        let mut scene = Scene::new();
        let a = scene.add_material(Material::new("A"));
        let b = scene.add_material(Material::new("B"));
        let c = scene.add_material(Material::new("C"));
        let q = Arc::new(Mesh::quad(1.0));
        let root = scene.add_node("root", None, Mat4::IDENTITY);
        scene.add_renderer("k1", Some(root), Mat4::IDENTITY, Renderer::new_skinned(q.clone(), vec![], [b]));
        scene.add_renderer("s1", Some(root), Mat4::IDENTITY, Renderer::new_static(q.clone(), [a]));
        scene.add_renderer("s2", Some(root), Mat4::IDENTITY, Renderer::new_static(q.clone(), [b, a]));
        scene.add_renderer("s3", Some(root), Mat4::IDENTITY, Renderer::new_static(q.clone(), [a]));
        scene.add_renderer("k2", Some(root), Mat4::IDENTITY, Renderer::new_skinned(q, vec![], [c]));
        (scene, vec![root], [a, b, c])
    }

    fn names(plan: &GroupPlan) -> Vec<&str> {
        plan.instances.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_one_group_per_material() {
        let (scene, sel, [a, b, c]) = scene();
        let plans = plan_groups(&collect(&scene, &sel), false);
        let keys: Vec<_> = plans.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![Some(a), Some(b), Some(c)]);
        assert_eq!(names(&plans[0]), vec!["root_s1", "root_s3"]);
        // Statics before skinned within a group
        assert_eq!(names(&plans[1]), vec!["root_s2", "root_k1"]);
        assert_eq!(names(&plans[2]), vec!["root_k2"]);
    }

    #[test]
    fn test_forced_shared_group() {
        let (scene, sel, [a, ..]) = scene();
        let plans = plan_groups(&collect(&scene, &sel), true);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].key, Some(a));
        assert_eq!(plans[0].instances.len(), 5);
    }

    #[test]
    fn test_empty_plans_nothing() {
        assert!(plan_groups(&Collected::default(), false).is_empty());
        assert!(plan_groups(&Collected::default(), true).is_empty());
    }

    #[test]
    fn test_allocate_three_targets_each() {
        let (scene, sel, _) = scene();
        let plans = plan_groups(&collect(&scene, &sel), false);
        let mut backend = SoftwareBackend::new();
        let mut ledger = TargetLedger::new();
        let groups = allocate(plans, 64, &mut backend, &mut ledger).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(ledger.len(), 9);
        ledger.release_all(&mut backend);
        assert_eq!(backend.live_targets(), 0);
    }
}
