//! Post-process pass: turns accumulated sums into final texels.

use super::cache::mesh_draws;
use super::group::BakeGroup;
use crate::config::{BakeConfig, BakeMode};
use crate::render::{PostParams, RenderBackend, TargetId};
use crate::scene::Scene;
use crate::util::{Result, Vec4};

pub fn post_params(config: &BakeConfig) -> PostParams {
    match config.bake_mode {
        BakeMode::AmbientOcclusion => PostParams::AmbientOcclusion { ao_bias: config.ao_bias },
        BakeMode::BentNormal => PostParams::BentNormal { space: config.normals_space },
        BakeMode::NormalsConversion => PostParams::Conversion(config.conversion_mode),
    }
}

/// Re-rasterize each group's meshes, writing finished texels through
/// `scratch` back into `result`.
#[tracing::instrument(skip_all, fields(groups = groups.len()))]
pub fn post_process<B: RenderBackend + ?Sized>(
    scene: &Scene,
    groups: &[BakeGroup],
    config: &BakeConfig,
    backend: &mut B,
    scratch: TargetId,
) -> Result<()> {
    let params = post_params(config);
    for group in groups {
        let draws = mesh_draws(scene, group, config);
        backend.clear(scratch, Vec4::ZERO)?;
        backend.post_process(scratch, group.result, group.normal_cache, &draws, &params)?;
        backend.copy(scratch, group.result)?;
    }
    Ok(())
}
