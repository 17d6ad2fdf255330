//! CPU render backend.
//!
//! Triangles are binned into horizontal bands of [`BAND_ROWS`] rows and each
//! band is filled on its own rayon task, so a pass writes disjoint rows in
//! parallel and returns only when the whole target is done.

use std::collections::HashMap;

use rayon::prelude::*;

use super::{
    CacheParams, CacheSpace, DepthConvention, DepthDraw, DepthShading, DepthView, MeshDraw, NormalMapSpace,
    PixelBuffer, PostParams, Program, RenderBackend, SampleParams, TargetFormat, TargetId,
};
use crate::scene::{CullMode, Mesh};
use crate::shading::{self, Fragment};
use crate::util::{Error, Mat3, Result, Vec2, Vec3, Vec4};

/// Rows per raster band.
const BAND_ROWS: usize = 16;

/// Barycentric slack so texel centres on shared edges are not dropped.
const EDGE_EPSILON: f32 = 1e-6;

/// Counts of passes run, for inspection by hosts and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub targets_created: usize,
    pub data_cache_draws: usize,
    pub depth_renders: usize,
    pub accumulates: usize,
    pub post_processes: usize,
    pub dilates: usize,
    pub composites: usize,
    pub read_backs: usize,
}

#[derive(Clone, Debug)]
enum Surface {
    Color(Vec<Vec4>),
    Depth(Vec<f32>),
}

#[derive(Clone, Debug)]
struct Target {
    label: String,
    size: usize,
    surface: Surface,
}

impl Target {
    fn color(&self, id: TargetId) -> Result<&[Vec4]> {
        match &self.surface {
            Surface::Color(px) => Ok(px),
            Surface::Depth(_) => Err(Error::TargetFormat { target: id, expected: "color" }),
        }
    }
}

/// Pixel-space triangle ready for scan conversion.
struct TriSetup {
    v: [Vec2; 3],
    inv_area: f32,
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
}

#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Inclusive texel range whose centres fall inside `[lo, hi]`, clamped to `0..n`.
fn texel_span(lo: f32, hi: f32, n: usize) -> Option<(usize, usize)> {
    let first = (lo - 0.5).ceil().max(0.0);
    let last = (hi - 0.5).floor().min(n as f32 - 1.0);
    (first <= last).then_some((first as usize, last as usize))
}

/// Triangles of one draw, binned by band.
struct Raster {
    width: usize,
    tris: Vec<(usize, TriSetup)>,
    bins: Vec<Vec<u32>>,
}

impl Raster {
    /// `tris` yields (caller's triangle index, pixel-space corners).
    fn new(width: usize, height: usize, tris: impl Iterator<Item = (usize, [Vec2; 3])>) -> Self {
        let mut setups = Vec::new();
        let mut bins = vec![Vec::new(); height.div_ceil(BAND_ROWS)];
        for (index, v) in tris {
            let area = edge(v[0], v[1], v[2]);
            if !area.is_finite() || area.abs() <= f32::EPSILON {
                continue;
            }
            let min = v[0].min(v[1]).min(v[2]);
            let max = v[0].max(v[1]).max(v[2]);
            let (Some((x0, x1)), Some((y0, y1))) = (texel_span(min.x, max.x, width), texel_span(min.y, max.y, height))
            else {
                continue;
            };
            let slot = setups.len() as u32;
            for bin in &mut bins[y0 / BAND_ROWS..=y1 / BAND_ROWS] {
                bin.push(slot);
            }
            setups.push((index, TriSetup { v, inv_area: 1.0 / area, x0, x1, y0, y1 }));
        }
        Self { width, tris: setups, bins }
    }

    /// Visit covered texel centres of `band` as (triangle, x, row within band, barycentrics).
    fn band_fragments(&self, band: usize, mut visit: impl FnMut(usize, usize, usize, Vec3)) {
        let Some(bin) = self.bins.get(band) else {
            return;
        };
        let band_y0 = band * BAND_ROWS;
        let band_y1 = band_y0 + BAND_ROWS - 1;
        for &slot in bin {
            let (index, t) = &self.tris[slot as usize];
            for y in t.y0.max(band_y0)..=t.y1.min(band_y1) {
                for x in t.x0..=t.x1.min(self.width - 1) {
                    let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                    let w0 = edge(t.v[1], t.v[2], p) * t.inv_area;
                    let w1 = edge(t.v[2], t.v[0], p) * t.inv_area;
                    let w2 = edge(t.v[0], t.v[1], p) * t.inv_area;
                    if w0 >= -EDGE_EPSILON && w1 >= -EDGE_EPSILON && w2 >= -EDGE_EPSILON {
                        visit(*index, x, y - band_y0, Vec3::new(w0, w1, w2));
                    }
                }
            }
        }
    }
}

#[inline]
fn lerp3(v: &[Vec3], [a, b, c]: [usize; 3], w: Vec3) -> Vec3 {
    v[a] * w.x + v[b] * w.y + v[c] * w.z
}

#[inline]
fn lerp4(v: &[Vec4], [a, b, c]: [usize; 3], w: Vec3) -> Vec4 {
    v[a] * w.x + v[b] * w.y + v[c] * w.z
}

#[inline]
fn lerp2(v: &[Vec2], [a, b, c]: [usize; 3], w: Vec3) -> Vec2 {
    v[a] * w.x + v[b] * w.y + v[c] * w.z
}

/// UV-space raster of a mesh's `channel` on a `size`² target.
fn uv_raster(mesh: &Mesh, channel: usize, size: usize) -> Option<(Raster, Vec<[usize; 3]>)> {
    let uvs = mesh.uv(channel)?;
    let scale = size as f32;
    let corners: Vec<[usize; 3]> = mesh.triangles().collect();
    let raster = Raster::new(
        size,
        size,
        corners
            .iter()
            .enumerate()
            .map(|(i, &[a, b, c])| (i, [uvs[a] * scale, uvs[b] * scale, uvs[c] * scale])),
    );
    Some((raster, corners))
}

/// Reference CPU implementation of [`RenderBackend`].
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    targets: HashMap<TargetId, Target>,
    next_id: u32,
    budget: Option<usize>,
    missing: Vec<Program>,
    reversed_z: bool,
    stats: PassStats,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store depth as 1 at near and 0 at far.
    pub fn with_reversed_z(mut self, reversed_z: bool) -> Self {
        self.reversed_z = reversed_z;
        self
    }

    /// Refuse to hold more than `max_targets` live targets at once.
    pub fn with_target_budget(mut self, max_targets: usize) -> Self {
        self.budget = Some(max_targets);
        self
    }

    /// Report `program` as unavailable.
    pub fn without_program(mut self, program: Program) -> Self {
        self.missing.push(program);
        self
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    fn require(&self, program: Program) -> Result<()> {
        if self.has_program(program) { Ok(()) } else { Err(Error::MissingProgram(program)) }
    }

    fn target(&self, id: TargetId) -> Result<&Target> {
        self.targets.get(&id).ok_or(Error::UnknownTarget(id))
    }

    fn color(&self, id: TargetId, size: usize) -> Result<&[Vec4]> {
        let target = self.target(id)?;
        if target.size != size {
            return Err(Error::other(format!(
                "target {id:?} ({}) is {}x{}, expected {size}x{size}",
                target.label, target.size, target.size
            )));
        }
        target.color(id)
    }

    fn take(&mut self, id: TargetId) -> Result<Target> {
        self.targets.remove(&id).ok_or(Error::UnknownTarget(id))
    }

    /// Run `f` with mutable access to colour target `id` and shared access
    /// to every other target.
    fn write_color<R>(&mut self, id: TargetId, f: impl FnOnce(&Self, &mut [Vec4], usize) -> Result<R>) -> Result<R> {
        let mut target = self.take(id)?;
        let size = target.size;
        let result = match &mut target.surface {
            Surface::Color(px) => f(self, px, size),
            Surface::Depth(_) => Err(Error::TargetFormat { target: id, expected: "color" }),
        };
        self.targets.insert(id, target);
        result
    }

    fn distinct(dst: TargetId, sources: &[TargetId]) -> Result<()> {
        if sources.contains(&dst) { Err(Error::TargetAliasing(dst)) } else { Ok(()) }
    }

    fn rasterize_cache(pos: &mut [Vec4], nrm: &mut [Vec4], size: usize, draw: &MeshDraw, params: &CacheParams) {
        let mesh = draw.mesh;
        let Some((raster, corners)) = uv_raster(mesh, draw.uv_channel, size) else {
            return;
        };
        let Some(raster_uvs) = mesh.uv(draw.uv_channel) else {
            return;
        };
        let map_uvs = mesh.uv(0).unwrap_or(raster_uvs);
        let normals = mesh.vertex_normals();
        let tangents = mesh.vertex_tangents();
        let normal_matrix = Mat3::from_mat4(draw.transform).inverse().transpose();

        pos.par_chunks_mut(size * BAND_ROWS)
            .zip(nrm.par_chunks_mut(size * BAND_ROWS))
            .enumerate()
            .for_each(|(band, (p_rows, n_rows))| {
                raster.band_fragments(band, |tri, x, y, w| {
                    let tri = corners[tri];
                    let world = draw.transform.transform_point3(lerp3(&mesh.positions, tri, w));
                    let vertex_n = lerp3(&normals, tri, w);
                    let object_n = match draw.normal_map {
                        Some(map) => {
                            let texel = map.sample(lerp2(map_uvs, tri, w));
                            match params.normal_map {
                                NormalMapSpace::Tangent => {
                                    shading::apply_tangent_normal_map(vertex_n, lerp4(&tangents, tri, w), texel)
                                }
                                NormalMapSpace::Object => shading::decode_normal(texel.truncate())
                                    .normalize_or(vertex_n.normalize_or(Vec3::Y)),
                            }
                        }
                        None => vertex_n.normalize_or(Vec3::Y),
                    };
                    let out_n = match params.space {
                        CacheSpace::World => (normal_matrix * object_n).normalize_or(Vec3::Y),
                        CacheSpace::Object => object_n,
                    };
                    let i = y * size + x;
                    p_rows[i] = world.extend(1.0);
                    n_rows[i] = out_n.extend(1.0);
                });
            });
    }
}

impl RenderBackend for SoftwareBackend {
    fn has_program(&self, program: Program) -> bool {
        !self.missing.contains(&program)
    }

    fn depth_convention(&self) -> DepthConvention {
        DepthConvention { reversed_z: self.reversed_z }
    }

    fn create_target(&mut self, label: &str, size: u32, format: TargetFormat) -> Result<TargetId> {
        let fail = |reason: String| Error::TargetAllocation { label: label.to_string(), size, reason };
        if size == 0 {
            return Err(fail("zero size".into()));
        }
        if let Some(max) = self.budget.filter(|&max| self.targets.len() >= max) {
            return Err(fail(format!("target budget of {max} exhausted")));
        }

        let len = (size as usize) * (size as usize);
        let surface = match format {
            TargetFormat::Color => {
                let mut px = Vec::new();
                px.try_reserve_exact(len).map_err(|e| fail(e.to_string()))?;
                px.resize(len, Vec4::ZERO);
                Surface::Color(px)
            }
            TargetFormat::Depth => {
                let mut px = Vec::new();
                px.try_reserve_exact(len).map_err(|e| fail(e.to_string()))?;
                px.resize(len, self.depth_convention().clear_depth());
                Surface::Depth(px)
            }
        };

        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.targets.insert(
            id,
            Target {
                label: label.to_string(),
                size: size as usize,
                surface,
            },
        );
        self.stats.targets_created += 1;
        tracing::trace!(?id, label, size, ?format, "target created");
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) -> Result<()> {
        self.take(target).map(|_| ())
    }

    fn clear(&mut self, target: TargetId, value: Vec4) -> Result<()> {
        let t = self.targets.get_mut(&target).ok_or(Error::UnknownTarget(target))?;
        match &mut t.surface {
            Surface::Color(px) => px.fill(value),
            Surface::Depth(px) => px.fill(value.x),
        }
        Ok(())
    }

    fn copy(&mut self, src: TargetId, dst: TargetId) -> Result<()> {
        Self::distinct(dst, &[src])?;
        let mut out = self.take(dst)?;
        let result = match (&mut out.surface, self.target(src).map(|t| (&t.surface, t.size))) {
            (_, Err(e)) => Err(e),
            (_, Ok((_, size))) if size != out.size => Err(Error::other(format!(
                "cannot copy {size}x{size} target {src:?} into {}x{} target {dst:?}",
                out.size, out.size
            ))),
            (Surface::Color(d), Ok((Surface::Color(s), _))) => {
                d.copy_from_slice(s);
                Ok(())
            }
            (Surface::Depth(d), Ok((Surface::Depth(s), _))) => {
                d.copy_from_slice(s);
                Ok(())
            }
            (Surface::Color(_), Ok(_)) => Err(Error::TargetFormat { target: src, expected: "color" }),
            (Surface::Depth(_), Ok(_)) => Err(Error::TargetFormat { target: src, expected: "depth" }),
        };
        self.targets.insert(dst, out);
        result
    }

    fn draw_data_cache(
        &mut self,
        position: TargetId,
        normal: TargetId,
        draw: &MeshDraw,
        params: &CacheParams,
    ) -> Result<()> {
        self.require(Program::DataCache)?;
        Self::distinct(position, &[normal])?;
        self.stats.data_cache_draws += 1;

        let size = self.target(position)?.size;
        let mut nrm = self.take(normal)?;
        let result = match (nrm.size == size, &mut nrm.surface) {
            (true, Surface::Color(n)) => self.write_color(position, |_, p, size| {
                Self::rasterize_cache(p, n, size, draw, params);
                Ok(())
            }),
            (false, _) => Err(Error::other("position and normal caches differ in size")),
            (_, Surface::Depth(_)) => Err(Error::TargetFormat { target: normal, expected: "color" }),
        };
        self.targets.insert(normal, nrm);
        result
    }

    fn render_depth(
        &mut self,
        depth: TargetId,
        view: &DepthView,
        draws: &[DepthDraw],
        shading: DepthShading,
    ) -> Result<()> {
        self.require(Program::Depth(shading))?;
        self.stats.depth_renders += 1;

        let t = self.targets.get_mut(&depth).ok_or(Error::UnknownTarget(depth))?;
        let size = t.size;
        let Surface::Depth(buf) = &mut t.surface else {
            return Err(Error::TargetFormat { target: depth, expected: "depth" });
        };

        let res = size as f32;
        let mut corners: Vec<[Vec3; 3]> = Vec::new();
        for draw in draws {
            if !shading.draws(draw.tagged) {
                continue;
            }
            let cull = shading.cull(draw.cull);
            let to_shadow = view.world_to_shadow * draw.transform;
            for tri in draw.mesh.triangles() {
                let v = tri.map(|i| {
                    let s = to_shadow.project_point3(draw.mesh.positions[i]);
                    Vec3::new(s.x * res, s.y * res, s.z)
                });
                let area = edge(v[0].truncate(), v[1].truncate(), v[2].truncate());
                let culled = match cull {
                    CullMode::Off => false,
                    CullMode::Back => area <= 0.0,
                    CullMode::Front => area >= 0.0,
                };
                if !culled {
                    corners.push(v);
                }
            }
        }

        let raster = Raster::new(
            size,
            size,
            corners.iter().enumerate().map(|(i, v)| (i, v.map(|p| p.truncate()))),
        );
        let reversed = view.reversed_z;
        buf.par_chunks_mut(size * BAND_ROWS).enumerate().for_each(|(band, rows)| {
            raster.band_fragments(band, |tri, x, y, w| {
                let v = &corners[tri];
                let z = v[0].z * w.x + v[1].z * w.y + v[2].z * w.z;
                if !(0.0..=1.0).contains(&z) {
                    return;
                }
                let slot = &mut rows[y * size + x];
                if (reversed && z > *slot) || (!reversed && z < *slot) {
                    *slot = z;
                }
            });
        });
        Ok(())
    }

    fn accumulate(
        &mut self,
        dst: TargetId,
        prev: TargetId,
        position: TargetId,
        normal: TargetId,
        depth: TargetId,
        params: &SampleParams,
    ) -> Result<()> {
        self.require(Program::Accumulate)?;
        Self::distinct(dst, &[prev, position, normal, depth])?;
        self.stats.accumulates += 1;

        self.write_color(dst, |this, out, size| {
            let prev = this.color(prev, size)?;
            let pos = this.color(position, size)?;
            let nrm = this.color(normal, size)?;
            let depth_target = this.target(depth)?;
            let Surface::Depth(depth_buf) = &depth_target.surface else {
                return Err(Error::TargetFormat { target: depth, expected: "depth" });
            };
            let depth_size = depth_target.size;
            let texel = 1.0 / depth_size as f32;
            let normal_to_shadow = params.normal_to_shadow();

            let stored_depth = |s: Vec3| -> Option<f32> {
                if !(0.0..1.0).contains(&s.x) || !(0.0..1.0).contains(&s.y) {
                    return None;
                }
                let x = ((s.x * depth_size as f32) as usize).min(depth_size - 1);
                let y = ((s.y * depth_size as f32) as usize).min(depth_size - 1);
                Some(depth_buf[y * depth_size + x])
            };

            out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
                for (x, texel_out) in row.iter_mut().enumerate() {
                    let i = y * size + x;
                    let p = pos[i];
                    let contribution = if p.w > 0.0 {
                        let n = nrm[i].truncate();
                        let s = params.world_to_shadow.project_point3(p.truncate());
                        let bias = shading::slope_bias(params.shadow_bias, normal_to_shadow * n, texel);
                        let lit = shading::visibility(s.z, stored_depth(s), bias, params.reversed_z);
                        let hemi = shading::hemisphere(n, params.direction, params.clamp_to_hemisphere);
                        shading::sample_contribution(params.integrand, params.direction, lit, hemi)
                    } else {
                        Vec4::ZERO
                    };
                    *texel_out = shading::running_average(prev[i], contribution, params.index);
                }
            });
            Ok(())
        })
    }

    fn post_process(
        &mut self,
        dst: TargetId,
        src: TargetId,
        normal: TargetId,
        draws: &[MeshDraw],
        params: &PostParams,
    ) -> Result<()> {
        self.require(Program::PostProcess)?;
        Self::distinct(dst, &[src, normal])?;
        self.stats.post_processes += 1;

        self.write_color(dst, |this, out, size| {
            let src = this.color(src, size)?;
            let nrm = this.color(normal, size)?;
            for draw in draws {
                let mesh = draw.mesh;
                let Some((raster, corners)) = uv_raster(mesh, draw.uv_channel, size) else {
                    continue;
                };
                let normals = mesh.vertex_normals();
                let tangents = mesh.vertex_tangents();
                let linear = Mat3::from_mat4(draw.transform);

                out.par_chunks_mut(size * BAND_ROWS).enumerate().for_each(|(band, rows)| {
                    raster.band_fragments(band, |tri, x, y, w| {
                        let tri = corners[tri];
                        let i = (band * BAND_ROWS + y) * size + x;
                        let frag = Fragment {
                            linear,
                            normal: lerp3(&normals, tri, w),
                            tangent: lerp4(&tangents, tri, w),
                        };
                        rows[y * size + x] = match *params {
                            PostParams::AmbientOcclusion { ao_bias } => shading::ao_post(src[i], ao_bias),
                            PostParams::BentNormal { space } => {
                                shading::bent_normal_post(src[i], nrm[i].truncate(), &frag, space)
                            }
                            PostParams::Conversion(mode) => shading::conversion_post(nrm[i].truncate(), &frag, mode),
                        };
                    });
                });
            }
            Ok(())
        })
    }

    fn dilate(&mut self, dst: TargetId, src: TargetId) -> Result<()> {
        self.require(Program::Dilate)?;
        Self::distinct(dst, &[src])?;
        self.stats.dilates += 1;

        self.write_color(dst, |this, out, size| {
            let src = this.color(src, size)?;
            out.par_chunks_mut(size).enumerate().for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    let mut window = [None; 9];
                    for (k, slot) in window.iter_mut().enumerate() {
                        let nx = x as isize + (k % 3) as isize - 1;
                        let ny = y as isize + (k / 3) as isize - 1;
                        if (0..size as isize).contains(&nx) && (0..size as isize).contains(&ny) {
                            *slot = Some(src[ny as usize * size + nx as usize]);
                        }
                    }
                    *texel = shading::dilate_texel(&window);
                }
            });
            Ok(())
        })
    }

    fn composite(&mut self, dst: TargetId, src: TargetId) -> Result<()> {
        self.require(Program::Composite)?;
        Self::distinct(dst, &[src])?;
        self.stats.composites += 1;

        self.write_color(dst, |this, out, size| {
            let src = this.color(src, size)?;
            out.par_iter_mut()
                .zip(src.par_iter())
                .for_each(|(d, s)| *d = shading::composite_over(*s, *d));
            Ok(())
        })
    }

    fn read_pixels(&mut self, target: TargetId) -> Result<PixelBuffer> {
        self.stats.read_backs += 1;
        let t = self.target(target)?;
        Ok(PixelBuffer {
            width: t.size as u32,
            height: t.size as u32,
            pixels: t.color(target)?.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CullOverrideMode;
    use crate::scene::Texture;
    use crate::shading::Integrand;
    use crate::util::Mat4;

    fn cache_params() -> CacheParams {
        CacheParams {
            space: CacheSpace::World,
            normal_map: NormalMapSpace::Tangent,
        }
    }

    fn draw(mesh: &Mesh) -> MeshDraw<'_> {
        MeshDraw {
            mesh,
            transform: Mat4::IDENTITY,
            uv_channel: 0,
            normal_map: None,
        }
    }

    #[test]
    fn test_full_quad_covers_every_texel() {
        let mut be = SoftwareBackend::new();
        let pos = be.create_target("pos", 64, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 64, TargetFormat::Color).unwrap();
        let quad = Mesh::quad(2.0);
        be.draw_data_cache(pos, nrm, &draw(&quad), &cache_params()).unwrap();

        let p = be.read_pixels(pos).unwrap();
        let n = be.read_pixels(nrm).unwrap();
        assert!(p.pixels.iter().all(|t| t.w == 1.0));
        assert!(n.pixels.iter().all(|t| (t.truncate() - Vec3::Y).length() < 1e-5));
        // Row 0 is v = 0, which the quad maps to +Z
        assert!(p.get(0, 0).z > 0.9 && p.get(0, 63).z < -0.9);
        assert!(p.get(0, 0).x < -0.9 && p.get(63, 0).x > 0.9);
    }

    #[test]
    fn test_partial_uvs_leave_background_empty() {
        let mut be = SoftwareBackend::new();
        let pos = be.create_target("pos", 64, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 64, TargetFormat::Color).unwrap();
        let quad = Mesh::quad(1.0).with_uv_rect(Vec2::splat(0.25), Vec2::splat(0.75));
        be.draw_data_cache(pos, nrm, &draw(&quad), &cache_params()).unwrap();

        let p = be.read_pixels(pos).unwrap();
        let covered = p.pixels.iter().filter(|t| t.w > 0.0).count();
        assert_eq!(covered, 32 * 32);
        assert_eq!(p.get(0, 0).w, 0.0);
        assert_eq!(p.get(32, 32).w, 1.0);
    }

    #[test]
    fn test_missing_uv_channel_draws_nothing() {
        let mut be = SoftwareBackend::new();
        let pos = be.create_target("pos", 64, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 64, TargetFormat::Color).unwrap();
        let quad = Mesh::quad(1.0);
        let d = MeshDraw { uv_channel: 2, ..draw(&quad) };
        be.draw_data_cache(pos, nrm, &d, &cache_params()).unwrap();
        assert!(be.read_pixels(pos).unwrap().pixels.iter().all(|t| t.w == 0.0));
    }

    #[test]
    fn test_depth_keeps_nearest() {
        let mut be = SoftwareBackend::new();
        let depth = be.create_target("depth", 64, TargetFormat::Depth).unwrap();
        // Camera looking down -Y onto two stacked quads
        let view = Mat4::look_to_rh(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, Vec3::Z);
        let proj = Mat4::orthographic_rh_gl(-2.0, 2.0, -2.0, 2.0, 0.01, 4.0);
        let scale_bias = Mat4::from_translation(Vec3::splat(0.5)) * Mat4::from_scale(Vec3::splat(0.5));
        let view = DepthView {
            world_to_shadow: scale_bias * proj * view,
            reversed_z: false,
        };
        let quad = Mesh::quad(2.0);
        let draws = [
            DepthDraw { mesh: &quad, transform: Mat4::IDENTITY, cull: CullMode::Back, tagged: true },
            DepthDraw {
                mesh: &quad,
                transform: Mat4::from_translation(Vec3::Y),
                cull: CullMode::Back,
                tagged: true,
            },
        ];
        let shading = DepthShading::Replacement(CullOverrideMode::ForceTwoSided);
        be.render_depth(depth, &view, &draws, shading).unwrap();

        let t = be.target(depth).unwrap();
        let Surface::Depth(buf) = &t.surface else { panic!("not depth") };
        // Upper quad at eye distance 1 of range [0.01, 4]
        let expected = (1.0 - 0.01) / (4.0 - 0.01);
        assert!((buf[32 * 64 + 32] - expected).abs() < 1e-4);
        // Outside both quads stays at the far plane
        assert_eq!(buf[0], 1.0);
    }

    #[test]
    fn test_replacement_skips_untagged() {
        let mut be = SoftwareBackend::new();
        let depth = be.create_target("depth", 16, TargetFormat::Depth).unwrap();
        let quad = Mesh::quad(100.0);
        let draws = [DepthDraw { mesh: &quad, transform: Mat4::IDENTITY, cull: CullMode::Off, tagged: false }];
        let view = DepthView {
            world_to_shadow: Mat4::from_cols_array(&[
                0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.01, 0.0, 0.0, 0.5, 0.5, 0.5, 1.0,
            ]),
            reversed_z: false,
        };
        be.render_depth(depth, &view, &draws, DepthShading::Replacement(CullOverrideMode::ForceTwoSided))
            .unwrap();
        let Surface::Depth(buf) = &be.target(depth).unwrap().surface else { panic!("not depth") };
        assert!(buf.iter().all(|&d| d == 1.0));

        be.render_depth(depth, &view, &draws, DepthShading::MaterialShaders).unwrap();
        let Surface::Depth(buf) = &be.target(depth).unwrap().surface else { panic!("not depth") };
        assert!(buf.iter().all(|&d| d == 0.5));
    }

    /// Runs the integrator's per-sample sequence (copy result to `prev`,
    /// then accumulate) for each `(direction, stored depth)` pair and returns
    /// `result` after every sample.
    fn accumulate_samples(integrand: Integrand, samples: &[(Vec3, f32)]) -> Vec<PixelBuffer> {
        let mut be = SoftwareBackend::new();
        let result = be.create_target("result", 16, TargetFormat::Color).unwrap();
        let prev = be.create_target("prev", 16, TargetFormat::Color).unwrap();
        let pos = be.create_target("pos", 16, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 16, TargetFormat::Color).unwrap();
        let depth = be.create_target("depth", 8, TargetFormat::Depth).unwrap();

        // Every texel sits at the middle of shadow space facing +Z, except
        // texel 0 which is uncovered
        be.clear(pos, Vec4::new(0.5, 0.5, 0.5, 1.0)).unwrap();
        be.write_color(pos, |_, px, _| {
            px[0] = Vec4::ZERO;
            Ok(())
        })
        .unwrap();
        be.clear(nrm, Vec4::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        be.clear(result, Vec4::ZERO).unwrap();

        let mut after = Vec::new();
        for (index, &(direction, stored)) in samples.iter().enumerate() {
            be.clear(depth, Vec4::splat(stored)).unwrap();
            be.clear(prev, Vec4::ZERO).unwrap();
            be.copy(result, prev).unwrap();
            let params = SampleParams {
                index: index as u32,
                direction,
                world_to_shadow: Mat4::IDENTITY,
                integrand,
                clamp_to_hemisphere: true,
                shadow_bias: 0.0,
                reversed_z: false,
            };
            be.accumulate(result, prev, pos, nrm, depth, &params).unwrap();
            after.push(be.read_pixels(result).unwrap());
        }
        assert_eq!(be.stats().accumulates, samples.len());
        after
    }

    fn assert_close(a: Vec4, b: Vec4) {
        assert!((a - b).abs().max_element() < 1e-6, "{a} != {b}");
    }

    // Lit from above, occluded from the side, below the horizon
    const SAMPLES: [(Vec3, f32); 3] = [(Vec3::Z, 1.0), (Vec3::X, 0.2), (Vec3::NEG_Z, 1.0)];

    #[test]
    fn test_accumulate_is_mean_of_contributions() {
        let after = accumulate_samples(Integrand::AmbientOcclusion, &SAMPLES);
        // (lit * hemi, hemi, 0, 1) per sample
        let contributions = [
            Vec4::new(1.0, 1.0, 0.0, 1.0),
            Vec4::new(0.0, 1.0, 0.0, 1.0),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        ];
        for (k, buf) in after.iter().enumerate() {
            let mean = contributions[..=k].iter().copied().sum::<Vec4>() / (k + 1) as f32;
            assert_close(buf.get(5, 9), mean);
            assert_close(buf.get(15, 15), mean);
            assert_eq!(buf.get(0, 0), Vec4::ZERO);
        }
        assert_close(after[2].get(3, 3), Vec4::new(1.0 / 3.0, 2.0 / 3.0, 0.0, 1.0));
    }

    #[test]
    fn test_accumulate_bent_normal_mean() {
        let after = accumulate_samples(Integrand::BentNormal, &SAMPLES);
        assert_close(after[0].get(7, 7), Vec4::new(0.0, 0.0, 1.0, 1.0));
        assert_close(after[1].get(7, 7), Vec4::new(0.0, 0.0, 0.5, 1.0));
        assert_close(after[2].get(7, 7), Vec4::new(0.0, 0.0, 1.0 / 3.0, 1.0));
    }

    #[test]
    fn test_tangent_normal_map_perturbs_cache() {
        let mut be = SoftwareBackend::new();
        let pos = be.create_target("pos", 32, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 32, TargetFormat::Color).unwrap();
        let quad = Mesh::quad(2.0);
        // Tangent-space (0.6, 0, 0.8); the quad's tangent is +X and its normal +Y
        let map = Texture::solid("tilted", Vec4::new(0.8, 0.5, 0.9, 1.0));
        let draw = MeshDraw {
            normal_map: Some(&map),
            transform: Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)),
            ..draw(&quad)
        };
        be.draw_data_cache(pos, nrm, &draw, &cache_params()).unwrap();
        let n = be.read_pixels(nrm).unwrap();
        assert!(n.pixels.iter().all(|t| (t.truncate() - Vec3::new(0.6, 0.8, 0.0)).length() < 1e-4));

        // Same texel read as an object-space normal, cached in object space
        let object = CacheParams {
            space: CacheSpace::Object,
            normal_map: NormalMapSpace::Object,
        };
        be.draw_data_cache(pos, nrm, &draw, &object).unwrap();
        let n = be.read_pixels(nrm).unwrap();
        assert!((n.get(16, 16).truncate() - Vec3::new(0.6, 0.0, 0.8)).length() < 1e-4);
    }

    #[test]
    fn test_cache_rasterizes_second_uv_set() {
        let mut be = SoftwareBackend::new();
        let pos = be.create_target("pos", 32, TargetFormat::Color).unwrap();
        let nrm = be.create_target("nrm", 32, TargetFormat::Color).unwrap();
        // UV1 covers the left half only
        let half = [Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.0), Vec2::new(0.5, 1.0), Vec2::new(0.0, 1.0)];
        let quad = Mesh::quad(2.0).with_uv(1, half.to_vec());
        let draw = MeshDraw {
            uv_channel: 1,
            ..draw(&quad)
        };
        be.draw_data_cache(pos, nrm, &draw, &cache_params()).unwrap();
        let p = be.read_pixels(pos).unwrap();
        assert_eq!(p.pixels.iter().filter(|t| t.w > 0.0).count(), 16 * 32);
        assert_eq!(p.get(20, 5).w, 0.0);
        assert!(p.get(15, 5).x > 0.9);
    }

    #[test]
    fn test_accumulate_rejects_aliasing() {
        let mut be = SoftwareBackend::new();
        let a = be.create_target("a", 64, TargetFormat::Color).unwrap();
        let d = be.create_target("d", 64, TargetFormat::Depth).unwrap();
        let params = SampleParams {
            index: 0,
            direction: Vec3::Y,
            world_to_shadow: Mat4::IDENTITY,
            integrand: Integrand::AmbientOcclusion,
            clamp_to_hemisphere: true,
            shadow_bias: 0.01,
            reversed_z: false,
        };
        let err = be.accumulate(a, a, a, a, d, &params).unwrap_err();
        assert!(matches!(err, Error::TargetAliasing(id) if id == a));
        assert_eq!(be.live_targets(), 2);
    }

    #[test]
    fn test_budget_and_format_errors() {
        let mut be = SoftwareBackend::new().with_target_budget(1);
        let c = be.create_target("c", 64, TargetFormat::Color).unwrap();
        let err = be.create_target("d", 64, TargetFormat::Depth).unwrap_err();
        assert!(matches!(err, Error::TargetAllocation { .. }));

        be.release_target(c).unwrap();
        let d = be.create_target("d", 64, TargetFormat::Depth).unwrap();
        assert!(matches!(be.read_pixels(d), Err(Error::TargetFormat { .. })));
        assert!(matches!(be.release_target(c), Err(Error::UnknownTarget(_))));
    }

    #[test]
    fn test_missing_program_reported() {
        let mut be = SoftwareBackend::new().without_program(Program::Dilate);
        assert!(!be.has_program(Program::Dilate));
        let a = be.create_target("a", 64, TargetFormat::Color).unwrap();
        let b = be.create_target("b", 64, TargetFormat::Color).unwrap();
        assert!(matches!(be.dilate(a, b), Err(Error::MissingProgram(Program::Dilate))));
    }

    #[test]
    fn test_dilate_grows_one_ring() {
        let mut be = SoftwareBackend::new();
        let a = be.create_target("a", 64, TargetFormat::Color).unwrap();
        let b = be.create_target("b", 64, TargetFormat::Color).unwrap();
        be.write_color(a, |_, px, size| {
            px[10 * size + 10] = Vec4::new(1.0, 0.0, 0.0, 1.0);
            Ok(())
        })
        .unwrap();
        be.dilate(b, a).unwrap();
        let out = be.read_pixels(b).unwrap();
        assert_eq!(out.pixels.iter().filter(|t| t.w > 0.0).count(), 9);
        assert_eq!(out.get(11, 11), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(be.stats().dilates, 1);
    }

    #[test]
    fn test_copy_and_composite() {
        let mut be = SoftwareBackend::new();
        let a = be.create_target("a", 64, TargetFormat::Color).unwrap();
        let b = be.create_target("b", 64, TargetFormat::Color).unwrap();
        be.clear(a, Vec4::new(0.5, 0.5, 1.0, 1.0)).unwrap();
        be.copy(a, b).unwrap();
        assert_eq!(be.read_pixels(b).unwrap(), be.read_pixels(a).unwrap());

        be.clear(b, Vec4::ZERO).unwrap();
        be.composite(a, b).unwrap();
        assert_eq!(be.read_pixels(a).unwrap().get(5, 5), Vec4::new(0.5, 0.5, 1.0, 1.0));
        assert!(matches!(be.copy(a, a), Err(Error::TargetAliasing(_))));
    }
}
