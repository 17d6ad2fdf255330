//! Data cache pass: world position and normal per texel, in UV space.

use super::group::BakeGroup;
use crate::config::{BakeConfig, BakeMode, NormalsConversionMode};
use crate::render::{CacheParams, CacheSpace, MeshDraw, NormalMapSpace, RenderBackend};
use crate::scene::{Scene, Texture};
use crate::util::{Result, Vec4};

/// Cache parameters for a bake mode.
pub fn cache_params(config: &BakeConfig) -> CacheParams {
    match config.bake_mode {
        BakeMode::NormalsConversion => CacheParams {
            space: CacheSpace::Object,
            normal_map: match config.conversion_mode {
                NormalsConversionMode::TangentToObject => NormalMapSpace::Tangent,
                NormalsConversionMode::ObjectToTangent => NormalMapSpace::Object,
            },
        },
        BakeMode::BentNormal | BakeMode::AmbientOcclusion => CacheParams {
            space: CacheSpace::World,
            normal_map: NormalMapSpace::Tangent,
        },
    }
}

/// Normal map an instance's material contributes, if the config allows one.
pub fn normal_map<'a>(scene: &'a Scene, group: &BakeGroup, index: usize, config: &BakeConfig) -> Option<&'a Texture> {
    if !config.use_normal_maps || config.force_shared_texture {
        return None;
    }
    let material = group.instances[index].material?;
    scene.get_material(material)?.normal_map().map(|t| t.as_ref())
}

/// UV-space draws of every member that has the configured UV set.
pub fn mesh_draws<'a>(scene: &'a Scene, group: &'a BakeGroup, config: &BakeConfig) -> Vec<MeshDraw<'a>> {
    let channel = config.uv_channel.index();
    group
        .instances
        .iter()
        .enumerate()
        .filter(|(_, inst)| inst.mesh.uv(channel).is_some())
        .map(|(i, inst)| MeshDraw {
            mesh: &inst.mesh,
            transform: inst.transform,
            uv_channel: channel,
            normal_map: normal_map(scene, group, i, config),
        })
        .collect()
}

#[tracing::instrument(skip_all, fields(groups = groups.len()))]
pub fn render_data_cache<B: RenderBackend + ?Sized>(
    scene: &Scene,
    groups: &[BakeGroup],
    config: &BakeConfig,
    backend: &mut B,
) -> Result<()> {
    let params = cache_params(config);
    let channel = config.uv_channel.index();
    for group in groups {
        backend.clear(group.position_cache, Vec4::ZERO)?;
        backend.clear(group.normal_cache, Vec4::ZERO)?;
        backend.clear(group.result, Vec4::ZERO)?;

        for inst in group.instances.iter().filter(|i| i.mesh.uv(channel).is_none()) {
            tracing::warn!("{} has no {:?} coordinates, skipped", inst.name, config.uv_channel);
        }
        let draws = mesh_draws(scene, group, config);
        for draw in &draws {
            backend.draw_data_cache(group.position_cache, group.normal_cache, draw, &params)?;
        }
        tracing::debug!(key = ?group.key, draws = draws.len(), "data cache rendered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_params_per_mode() {
        let mut c = BakeConfig::default();
        assert_eq!(cache_params(&c).space, CacheSpace::World);

        c.bake_mode = BakeMode::NormalsConversion;
        assert_eq!(
            cache_params(&c),
            CacheParams {
                space: CacheSpace::Object,
                normal_map: NormalMapSpace::Tangent
            }
        );
        c.conversion_mode = NormalsConversionMode::ObjectToTangent;
        assert_eq!(cache_params(&c).normal_map, NormalMapSpace::Object);
    }
}
