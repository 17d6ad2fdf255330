//! Visibility integration: one depth render per sample direction, averaged
//! into every group's result target.

use std::sync::Arc;

use super::directions::sphere_directions;
use super::group::BakeGroup;
use crate::config::{BakeConfig, BakeMode};
use crate::progress::{CancellationToken, Progress, ProgressStage, ProgressUpdate};
use crate::render::{DepthDraw, DepthShading, DepthView, RenderBackend, SampleParams, TargetId};
use crate::scene::{CullMode, Mesh, NodeId, RendererStateGuard, Scene};
use crate::shading::Integrand;
use crate::util::{BBox3f, Error, Mat4, Result, Vec3, Vec4};

/// Near plane of the sample camera.
pub const NEAR_CLIP: f32 = 0.01;

/// Maps clip space `[-1, 1]³` to `[0, 1]³`.
pub fn scale_bias() -> Mat4 {
    Mat4::from_translation(Vec3::splat(0.5)) * Mat4::from_scale(Vec3::splat(0.5))
}

/// World to shadow-map space for an orthographic camera at
/// `center + direction * radius` looking back along `-direction`.
pub fn world_to_shadow(center: Vec3, radius: f32, direction: Vec3, reversed_z: bool) -> Mat4 {
    let eye = center + direction * radius;
    let up = if direction.y.abs() > 0.999 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_to_rh(eye, -direction, up);

    let far = (2.0 * radius).max(NEAR_CLIP * 2.0);
    let mut proj = Mat4::orthographic_rh_gl(-radius, radius, -radius, radius, NEAR_CLIP, far);
    if reversed_z {
        // Negate the depth row
        proj.x_axis.z = -proj.x_axis.z;
        proj.y_axis.z = -proj.y_axis.z;
        proj.z_axis.z = -proj.z_axis.z;
        proj.w_axis.z = -proj.w_axis.z;
    }
    scale_bias() * proj * view
}

/// A depth-pass draw owning its (possibly posed) mesh.
struct Occluder {
    mesh: Arc<Mesh>,
    transform: Mat4,
    cull: CullMode,
    tagged: bool,
}

/// Every enabled renderer of the scene as a depth occluder.
fn occluders(scene: &Scene) -> Vec<Occluder> {
    scene
        .renderer_nodes()
        .filter_map(|id| {
            let renderer = scene.renderer(id).filter(|r| r.enabled)?;
            let mesh = renderer.posed_mesh()?;
            let material = renderer.shared_material().and_then(|m| scene.get_material(m));
            Some(Occluder {
                mesh,
                transform: scene.world_transform(id),
                cull: material.map_or(CullMode::Back, |m| m.cull),
                tagged: material.is_some_and(|m| m.render_type.is_some()),
            })
        })
        .collect()
}

/// Depth program selected by the config.
pub fn depth_shading(config: &BakeConfig) -> DepthShading {
    if config.use_original_shaders {
        DepthShading::MaterialShaders
    } else {
        DepthShading::Replacement(config.cull_override)
    }
}

/// Render-target handles the integrator reuses across samples.
#[derive(Clone, Copy, Debug)]
pub struct IntegrationTargets {
    pub scratch: TargetId,
    pub depth: TargetId,
}

/// Run all samples. Returns `Error::Cancelled` if the token fires; the
/// scene's renderer states are restored either way.
#[tracing::instrument(skip_all, fields(samples = config.samples, groups = groups.len()))]
#[allow(clippy::too_many_arguments)]
pub fn integrate<B: RenderBackend + ?Sized>(
    scene: &mut Scene,
    groups: &[BakeGroup],
    bounds: &BBox3f,
    config: &BakeConfig,
    backend: &mut B,
    targets: IntegrationTargets,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<()> {
    let integrand = match config.bake_mode {
        BakeMode::BentNormal => Integrand::BentNormal,
        BakeMode::AmbientOcclusion => Integrand::AmbientOcclusion,
        BakeMode::NormalsConversion => return Ok(()),
    };
    let (center, radius) = bounds.bounding_sphere();
    let convention = backend.depth_convention();
    let shading = depth_shading(config);
    let directions = sphere_directions(config.samples);

    let bake_nodes: Vec<NodeId> = groups.iter().flat_map(|g| g.instances.iter().map(|i| i.node)).collect();
    let guard = RendererStateGuard::isolate(scene, &bake_nodes, config.include_scene);
    let occluders = occluders(&guard);
    let draws: Vec<DepthDraw> = occluders
        .iter()
        .map(|o| DepthDraw {
            mesh: &o.mesh,
            transform: o.transform,
            cull: o.cull,
            tagged: o.tagged,
        })
        .collect();
    tracing::debug!(occluders = draws.len(), radius, "integrating");

    for (index, &direction) in directions.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!("bake cancelled at sample {index}");
            return Err(Error::Cancelled);
        }
        progress.report(&ProgressUpdate {
            title: config.bake_mode.title(),
            stage: ProgressStage::Integrating,
            done: index as u32,
            total: config.samples,
        });

        let world_to_shadow = world_to_shadow(center, radius, direction, convention.reversed_z);
        backend.clear(targets.depth, Vec4::splat(convention.clear_depth()))?;
        let view = DepthView {
            world_to_shadow,
            reversed_z: convention.reversed_z,
        };
        backend.render_depth(targets.depth, &view, &draws, shading)?;

        let params = SampleParams {
            index: index as u32,
            direction,
            world_to_shadow,
            integrand,
            clamp_to_hemisphere: config.clamp_to_hemisphere,
            shadow_bias: config.shadow_bias,
            reversed_z: convention.reversed_z,
        };
        for group in groups {
            backend.clear(targets.scratch, Vec4::ZERO)?;
            backend.copy(group.result, targets.scratch)?;
            backend.accumulate(
                group.result,
                targets.scratch,
                group.position_cache,
                group.normal_cache,
                targets.depth,
                &params,
            )?;
        }
    }
    drop(guard);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_maps_to_middle_of_map() {
        for d in [Vec3::Y, Vec3::NEG_Y, Vec3::X, Vec3::new(0.3, -0.5, 0.81).normalize()] {
            let m = world_to_shadow(Vec3::new(1.0, 2.0, 3.0), 2.0, d, false);
            let s = m.project_point3(Vec3::new(1.0, 2.0, 3.0));
            assert!((s.x - 0.5).abs() < 1e-5 && (s.y - 0.5).abs() < 1e-5);
            // Eye distance 2 out of a [0.01, 4] range
            assert!((s.z - (2.0 - NEAR_CLIP) / (4.0 - NEAR_CLIP)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_reversed_z_flips_depth() {
        let center = Vec3::ZERO;
        let near_point = Vec3::new(0.0, 0.5, 0.0);
        let normal = world_to_shadow(center, 1.0, Vec3::Y, false).project_point3(near_point);
        let reversed = world_to_shadow(center, 1.0, Vec3::Y, true).project_point3(near_point);
        assert!((normal.z + reversed.z - 1.0).abs() < 1e-5);
        assert!(reversed.z > normal.z);
        assert!((normal.x - reversed.x).abs() < 1e-6);
    }

    #[test]
    fn test_sphere_fits_map() {
        let d = Vec3::new(0.48, 0.6, 0.64);
        let m = world_to_shadow(Vec3::ZERO, 1.0, d, false);
        // Points on the sphere perpendicular to d land on the map border
        let side = d.any_orthonormal_vector();
        let s = m.project_point3(side);
        let offset = (s.truncate() - crate::util::Vec2::splat(0.5)).length();
        assert!((offset - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_depth_shading_from_config() {
        let mut c = BakeConfig::default();
        assert!(matches!(depth_shading(&c), DepthShading::Replacement(_)));
        c.use_original_shaders = true;
        assert_eq!(depth_shading(&c), DepthShading::MaterialShaders);
    }
}
