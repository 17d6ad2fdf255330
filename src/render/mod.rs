//! Offscreen rendering seam.
//!
//! The baker drives a [`RenderBackend`] through a fixed set of passes on
//! square render targets. [`SoftwareBackend`] implements all of them on the
//! CPU; a GPU host implements the same trait over its own API.
//!
//! Target conventions shared by every backend:
//! - colour targets are linear RGBA `f32`, depth targets single `f32`
//! - texel `(x, y)` covers UV `[(x, y), (x + 1, y + 1)] / size`, so row 0
//!   is at v = 0
//! - a texel with zero alpha is empty

mod software;

pub use software::{PassStats, SoftwareBackend};

use crate::config::{CullOverrideMode, NormalsConversionMode, NormalsSpace};
use crate::scene::{CullMode, Mesh, Texture};
use crate::shading::Integrand;
use crate::util::{Mat3, Mat4, Result, Vec3, Vec4};

/// Handle to a backend render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFormat {
    /// RGBA `f32`.
    Color,
    /// Single `f32` depth.
    Depth,
}

/// How the depth pass shades its draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthShading {
    /// Depth-only replacement program. Only materials carrying a
    /// render-type tag are drawn.
    Replacement(CullOverrideMode),
    /// Each material's own shading, with its own cull mode.
    MaterialShaders,
}

impl DepthShading {
    /// Culling applied to a draw whose material wants `material`.
    pub fn cull(self, material: CullMode) -> CullMode {
        match self {
            DepthShading::Replacement(CullOverrideMode::ForceTwoSided) => CullMode::Off,
            DepthShading::Replacement(CullOverrideMode::ForceOneSided) => CullMode::Back,
            DepthShading::Replacement(CullOverrideMode::UseMaterialParameter) | DepthShading::MaterialShaders => {
                material
            }
        }
    }

    /// Whether a draw with this render-type tag is rendered at all.
    pub fn draws(self, tagged: bool) -> bool {
        match self {
            DepthShading::Replacement(_) => tagged,
            DepthShading::MaterialShaders => true,
        }
    }
}

/// GPU programs (or CPU kernels) a bake may need.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    DataCache,
    Depth(DepthShading),
    Accumulate,
    PostProcess,
    Dilate,
    Composite,
}

/// Depth range convention of a backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepthConvention {
    /// Near maps to 1 and far to 0.
    pub reversed_z: bool,
}

impl DepthConvention {
    /// Value a depth target is cleared to (the far plane).
    pub fn clear_depth(self) -> f32 {
        if self.reversed_z { 0.0 } else { 1.0 }
    }
}

/// Mesh drawn in UV space.
#[derive(Clone, Copy, Debug)]
pub struct MeshDraw<'a> {
    pub mesh: &'a Mesh,
    /// Object to world.
    pub transform: Mat4,
    /// UV set used as the raster position.
    pub uv_channel: usize,
    pub normal_map: Option<&'a Texture>,
}

/// Mesh drawn into a depth map.
#[derive(Clone, Copy, Debug)]
pub struct DepthDraw<'a> {
    pub mesh: &'a Mesh,
    pub transform: Mat4,
    pub cull: CullMode,
    /// Material has a render-type tag.
    pub tagged: bool,
}

/// Space of the normal written to the normal cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheSpace {
    World,
    Object,
}

/// How a normal map's texels are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalMapSpace {
    Tangent,
    Object,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheParams {
    pub space: CacheSpace,
    pub normal_map: NormalMapSpace,
}

/// Shadow camera of one depth render.
#[derive(Clone, Copy, Debug)]
pub struct DepthView {
    /// World to `[0, 1]³` shadow space.
    pub world_to_shadow: Mat4,
    pub reversed_z: bool,
}

/// Per-sample accumulation inputs.
#[derive(Clone, Copy, Debug)]
pub struct SampleParams {
    /// Zero-based sample index, the running-average weight.
    pub index: u32,
    /// Unit direction towards the sample camera.
    pub direction: Vec3,
    pub world_to_shadow: Mat4,
    pub integrand: Integrand,
    pub clamp_to_hemisphere: bool,
    pub shadow_bias: f32,
    pub reversed_z: bool,
}

impl SampleParams {
    /// Maps world normals into shadow space (inverse transpose).
    pub fn normal_to_shadow(&self) -> Mat3 {
        Mat3::from_mat4(self.world_to_shadow).inverse().transpose()
    }
}

/// Post-process kernel selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PostParams {
    AmbientOcclusion { ao_bias: f32 },
    BentNormal { space: NormalsSpace },
    Conversion(NormalsConversionMode),
}

/// Read-back colour target, rows in target order (row 0 at v = 0).
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl PixelBuffer {
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Reverse row order in place.
    pub fn flip_rows(&mut self) {
        let w = self.width as usize;
        let h = self.height as usize;
        for y in 0..h / 2 {
            let (top, bottom) = self.pixels.split_at_mut((h - 1 - y) * w);
            top[y * w..(y + 1) * w].swap_with_slice(&mut bottom[..w]);
        }
    }
}

/// Offscreen renderer used by the baker.
///
/// Passes never read and write the same target; implementations reject
/// such calls with [`Error::TargetAliasing`](crate::util::Error::TargetAliasing).
pub trait RenderBackend {
    fn has_program(&self, program: Program) -> bool;

    fn depth_convention(&self) -> DepthConvention;

    fn create_target(&mut self, label: &str, size: u32, format: TargetFormat) -> Result<TargetId>;

    fn release_target(&mut self, target: TargetId) -> Result<()>;

    /// Fill a colour target with `value`, or a depth target with `value.x`.
    fn clear(&mut self, target: TargetId, value: Vec4) -> Result<()>;

    fn copy(&mut self, src: TargetId, dst: TargetId) -> Result<()>;

    /// Rasterize `draw` in UV space, writing world position (alpha 1) to
    /// `position` and the shading normal (alpha 1) to `normal`.
    fn draw_data_cache(&mut self, position: TargetId, normal: TargetId, draw: &MeshDraw, params: &CacheParams)
    -> Result<()>;

    /// Depth-test `draws` into `depth` as seen through `view`.
    fn render_depth(&mut self, depth: TargetId, view: &DepthView, draws: &[DepthDraw], shading: DepthShading)
    -> Result<()>;

    /// `dst = (prev * i + contribution) / (i + 1)` per texel.
    fn accumulate(
        &mut self,
        dst: TargetId,
        prev: TargetId,
        position: TargetId,
        normal: TargetId,
        depth: TargetId,
        params: &SampleParams,
    ) -> Result<()>;

    /// Rasterize `draws` in UV space, writing the finished texel for `src`.
    fn post_process(
        &mut self,
        dst: TargetId,
        src: TargetId,
        normal: TargetId,
        draws: &[MeshDraw],
        params: &PostParams,
    ) -> Result<()>;

    /// One dilation pass from `src` into `dst`.
    fn dilate(&mut self, dst: TargetId, src: TargetId) -> Result<()>;

    /// Alpha-blend `src` over `dst`.
    fn composite(&mut self, dst: TargetId, src: TargetId) -> Result<()>;

    fn read_pixels(&mut self, target: TargetId) -> Result<PixelBuffer>;
}

/// Records every target a bake allocates so all of them can be released
/// on any exit path.
#[derive(Debug, Default)]
pub struct TargetLedger {
    live: Vec<TargetId>,
}

impl TargetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        label: &str,
        size: u32,
        format: TargetFormat,
    ) -> Result<TargetId> {
        let id = backend.create_target(label, size, format)?;
        self.live.push(id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Release everything, newest first. Release errors are logged, not returned.
    pub fn release_all<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        let count = self.live.len();
        while let Some(id) = self.live.pop() {
            if let Err(e) = backend.release_target(id) {
                tracing::warn!("failed to release target {id:?}: {e}");
            }
        }
        if count > 0 {
            tracing::debug!(count, "released render targets");
        }
    }
}
