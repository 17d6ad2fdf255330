//! Dilation: grow filled texels outward so texture filtering near UV seams
//! does not pull in background.

use super::group::BakeGroup;
use crate::render::{RenderBackend, TargetId};
use crate::util::{Result, Vec4};

/// Exactly `passes` dilation steps on `result`, ping-ponging through
/// `scratch`. Ends with the dilated image in `result`.
pub fn dilate<B: RenderBackend + ?Sized>(
    backend: &mut B,
    result: TargetId,
    scratch: TargetId,
    passes: u32,
) -> Result<()> {
    if passes == 0 {
        return Ok(());
    }
    backend.clear(scratch, Vec4::ZERO)?;
    for pass in 0..passes {
        if pass % 2 == 0 {
            backend.dilate(scratch, result)?;
        } else {
            backend.dilate(result, scratch)?;
        }
    }
    if passes % 2 == 1 {
        backend.copy(scratch, result)?;
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(passes = passes))]
pub fn dilate_groups<B: RenderBackend + ?Sized>(
    groups: &[BakeGroup],
    backend: &mut B,
    scratch: TargetId,
    passes: u32,
) -> Result<()> {
    for group in groups {
        dilate(backend, group.result, scratch, passes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{CacheParams, CacheSpace, MeshDraw, NormalMapSpace, SoftwareBackend, TargetFormat};
    use crate::scene::Mesh;
    use crate::util::{Mat4, Vec2};

    fn seeded(be: &mut SoftwareBackend) -> (TargetId, TargetId) {
        let result = be.create_target("result", 64, TargetFormat::Color).unwrap();
        let scratch = be.create_target("scratch", 64, TargetFormat::Color).unwrap();
        be.clear(result, Vec4::ZERO).unwrap();
        (result, scratch)
    }

    fn filled(be: &mut SoftwareBackend, t: TargetId) -> usize {
        be.read_pixels(t).unwrap().pixels.iter().filter(|p| p.w > 0.0).count()
    }

    fn fill_all(be: &mut SoftwareBackend, t: TargetId) {
        be.clear(t, Vec4::new(0.2, 0.4, 0.6, 1.0)).unwrap();
    }

    #[test]
    fn test_zero_passes_is_identity() {
        let mut be = SoftwareBackend::new();
        let (result, scratch) = seeded(&mut be);
        dilate(&mut be, result, scratch, 0).unwrap();
        assert_eq!(be.stats().dilates, 0);
        assert_eq!(filled(&mut be, result), 0);
    }

    #[test]
    fn test_exact_pass_count() {
        for passes in [1, 2, 5] {
            let mut be = SoftwareBackend::new();
            let (result, scratch) = seeded(&mut be);
            dilate(&mut be, result, scratch, passes).unwrap();
            assert_eq!(be.stats().dilates, passes as usize);
        }
    }

    #[test]
    fn test_single_texel_grows_to_square() {
        let mut be = SoftwareBackend::new();
        let (result, scratch) = seeded(&mut be);
        let normals = be.create_target("normals", 64, TargetFormat::Color).unwrap();
        let dot = Mesh::quad(1.0).with_uv_rect(Vec2::splat(20.0 / 64.0), Vec2::splat(21.0 / 64.0));
        let draw = MeshDraw {
            mesh: &dot,
            transform: Mat4::IDENTITY,
            uv_channel: 0,
            normal_map: None,
        };
        let params = CacheParams {
            space: CacheSpace::World,
            normal_map: NormalMapSpace::Tangent,
        };
        be.draw_data_cache(result, normals, &draw, &params).unwrap();
        assert_eq!(filled(&mut be, result), 1);

        dilate(&mut be, result, scratch, 3).unwrap();
        assert_eq!(filled(&mut be, result), 49);
    }

    #[test]
    fn test_full_coverage_is_fixed_point() {
        let mut be = SoftwareBackend::new();
        let (result, scratch) = seeded(&mut be);
        fill_all(&mut be, result);
        let before = be.read_pixels(result).unwrap();
        dilate(&mut be, result, scratch, 3).unwrap();
        assert_eq!(be.read_pixels(result).unwrap(), before);
    }
}
