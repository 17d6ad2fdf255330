//! Scoped renderer enable-state override.

use std::ops::{Deref, DerefMut};

use super::{NodeId, Scene};

/// Borrows the scene mutably while a bake isolates its renderers, and puts
/// every renderer's `enabled` flag back on drop.
pub struct RendererStateGuard<'a> {
    scene: &'a mut Scene,
    saved: Vec<(NodeId, bool)>,
}

impl<'a> RendererStateGuard<'a> {
    /// Force-enable `bake_nodes`; unless `include_scene`, disable every
    /// other renderer.
    pub fn isolate(scene: &'a mut Scene, bake_nodes: &[NodeId], include_scene: bool) -> Self {
        let saved: Vec<(NodeId, bool)> = scene
            .renderer_nodes()
            .filter_map(|id| scene.renderer(id).map(|r| (id, r.enabled)))
            .collect();

        if !include_scene {
            for &(id, _) in &saved {
                scene.set_enabled(id, false);
            }
        }
        for &id in bake_nodes {
            scene.set_enabled(id, true);
        }
        tracing::debug!(saved = saved.len(), include_scene, "renderer state isolated");
        Self { scene, saved }
    }
}

impl Deref for RendererStateGuard<'_> {
    type Target = Scene;

    fn deref(&self) -> &Scene {
        self.scene
    }
}

impl DerefMut for RendererStateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scene {
        self.scene
    }
}

impl Drop for RendererStateGuard<'_> {
    fn drop(&mut self) {
        for &(id, enabled) in &self.saved {
            self.scene.set_enabled(id, enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Material, Mesh, Renderer};
    use crate::util::Mat4;
    use std::sync::Arc;

    fn three_renderers() -> (Scene, [NodeId; 3]) {
        let mut scene = Scene::new();
        let m = scene.add_material(Material::new("m"));
        let mesh = Arc::new(Mesh::quad(1.0));
        let a = scene.add_renderer("a", None, Mat4::IDENTITY, Renderer::new_static(mesh.clone(), [m]));
        let b = scene.add_renderer("b", None, Mat4::IDENTITY, Renderer::new_static(mesh.clone(), [m]));
        let c = scene.add_renderer("c", None, Mat4::IDENTITY, Renderer::new_static(mesh, [m]));
        scene.node_mut(b).renderer.as_mut().unwrap().enabled = false;
        (scene, [a, b, c])
    }

    fn enabled(scene: &Scene) -> Vec<bool> {
        scene.renderer_nodes().map(|id| scene.renderer(id).unwrap().enabled).collect()
    }

    #[test]
    fn test_isolate_and_restore() {
        let (mut scene, [_, b, _]) = three_renderers();
        let before = enabled(&scene);
        {
            let guard = RendererStateGuard::isolate(&mut scene, &[b], false);
            assert_eq!(enabled(&guard), vec![false, true, false]);
        }
        assert_eq!(enabled(&scene), before);
    }

    #[test]
    fn test_include_scene_keeps_others() {
        let (mut scene, [a, _, _]) = three_renderers();
        {
            let guard = RendererStateGuard::isolate(&mut scene, &[a], true);
            assert_eq!(enabled(&guard), vec![true, false, true]);
        }
        assert_eq!(enabled(&scene), vec![true, false, true]);
    }

    #[test]
    fn test_restored_on_unwind() {
        let (mut scene, [_, b, _]) = three_renderers();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = RendererStateGuard::isolate(&mut scene, &[b], false);
            panic!("pass failed");
        }));
        assert!(result.is_err());
        assert_eq!(enabled(&scene), vec![true, false, true]);
    }
}
