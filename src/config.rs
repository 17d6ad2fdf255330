//! Bake configuration.
//!
//! [`BakeConfig`] is read once at the start of a bake and never changes
//! during it. It round-trips through JSON; missing keys take defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// What a bake produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BakeMode {
    #[default]
    BentNormal,
    AmbientOcclusion,
    /// Tangent <-> object space normal map conversion, no integration.
    NormalsConversion,
}

impl BakeMode {
    /// Progress title shown while baking.
    pub fn title(self) -> &'static str {
        match self {
            BakeMode::BentNormal => "Baking Bent Normal Map",
            BakeMode::AmbientOcclusion => "Baking Ambient Occlusion Map",
            BakeMode::NormalsConversion => "Converting Normals",
        }
    }
}

/// Space bent normals are written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalsSpace {
    #[default]
    Tangent,
    Object,
    World,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalsConversionMode {
    #[default]
    TangentToObject,
    ObjectToTangent,
}

/// Mesh UV set the bake rasterizes into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UvChannel {
    #[default]
    UV0,
    UV1,
    UV2,
    UV3,
}

impl UvChannel {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Square target edge length: a power of two in 64..=8192.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Resolution(u32);

impl Resolution {
    pub const MIN: u32 = 64;
    pub const MAX: u32 = 8192;

    pub fn new(size: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&size) && size.is_power_of_two() {
            Ok(Self(size))
        } else {
            Err(Error::config(format!(
                "resolution {size} must be a power of two in {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Every accepted resolution, ascending.
    pub fn all() -> impl Iterator<Item = Resolution> {
        (6..=13).map(|shift| Resolution(1 << shift))
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self(2048)
    }
}

impl TryFrom<u32> for Resolution {
    type Error = Error;

    fn try_from(size: u32) -> Result<Self> {
        Self::new(size)
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> u32 {
        r.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which candidate name a multi-renderer group is written under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameMode {
    #[default]
    Shortest,
    Longest,
    Alphabetical,
    /// First collected.
    Whatever,
}

/// Face culling used by the depth-only replacement program.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullOverrideMode {
    #[default]
    ForceTwoSided,
    ForceOneSided,
    UseMaterialParameter,
}

/// What happens when a group's file cannot be written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteFailurePolicy {
    /// Record the failure and keep writing the other groups.
    #[default]
    Isolate,
    /// Stop the bake on the first failure.
    Abort,
}

/// Bake parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeConfig {
    pub bake_mode: BakeMode,
    pub normals_space: NormalsSpace,
    pub conversion_mode: NormalsConversionMode,
    pub uv_channel: UvChannel,

    // Quality
    pub bake_res: Resolution,
    pub shadow_map_res: Resolution,
    pub samples: u32,
    pub dilation: u32,
    pub shadow_bias: f32,
    pub ao_bias: f32,
    pub clamp_to_hemisphere: bool,

    // Scene
    pub include_scene: bool,
    pub force_shared_texture: bool,
    pub use_normal_maps: bool,
    pub use_original_shaders: bool,
    pub cull_override: CullOverrideMode,

    // Output
    pub output_path: PathBuf,
    pub name_mode: NameMode,
    pub transparent_pixels: bool,
    pub write_failure: WriteFailurePolicy,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            bake_mode: BakeMode::BentNormal,
            normals_space: NormalsSpace::Tangent,
            conversion_mode: NormalsConversionMode::TangentToObject,
            uv_channel: UvChannel::UV0,
            bake_res: Resolution::default(),
            shadow_map_res: Resolution::default(),
            samples: 1024,
            dilation: 32,
            shadow_bias: 0.01,
            ao_bias: 0.5,
            clamp_to_hemisphere: true,
            include_scene: false,
            force_shared_texture: false,
            use_normal_maps: true,
            use_original_shaders: false,
            cull_override: CullOverrideMode::ForceTwoSided,
            output_path: PathBuf::from("bakes"),
            name_mode: NameMode::Shortest,
            transparent_pixels: false,
            write_failure: WriteFailurePolicy::Isolate,
        }
    }
}

impl BakeConfig {
    pub const MAX_SAMPLES: u32 = 8192;

    /// Per-user config file: `<config_dir>/bnao/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("bnao");
            p.push("config.json");
            p
        })
    }

    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-user config if present and readable, else defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(1..=Self::MAX_SAMPLES).contains(&self.samples) {
            return Err(Error::config(format!(
                "samples must be in 1..={}, got {}",
                Self::MAX_SAMPLES,
                self.samples
            )));
        }
        for (name, v) in [("shadow_bias", self.shadow_bias), ("ao_bias", self.ao_bias)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::config(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(Error::config("output_path is empty"));
        }
        Ok(())
    }

    /// Integration runs for every mode except conversion.
    pub fn integrates(&self) -> bool {
        self.bake_mode != BakeMode::NormalsConversion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let c = BakeConfig::default();
        c.validate().unwrap();
        assert_eq!(c.bake_res.get(), 2048);
        assert_eq!(c.samples, 1024);
        assert_eq!(c.dilation, 32);
        assert_eq!(c.output_path, PathBuf::from("bakes"));
    }

    #[test]
    fn test_resolution_range() {
        assert!(Resolution::new(64).is_ok());
        assert!(Resolution::new(8192).is_ok());
        assert!(Resolution::new(32).is_err());
        assert!(Resolution::new(16384).is_err());
        assert!(Resolution::new(1000).is_err());
        assert_eq!(Resolution::all().count(), 8);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let c: BakeConfig = serde_json::from_str(r#"{ "bake_mode": "AmbientOcclusion", "bake_res": 512 }"#).unwrap();
        assert_eq!(c.bake_mode, BakeMode::AmbientOcclusion);
        assert_eq!(c.bake_res.get(), 512);
        assert_eq!(c.shadow_map_res.get(), 2048);
        assert_eq!(c.name_mode, NameMode::Shortest);
    }

    #[test]
    fn test_bad_resolution_rejected_by_serde() {
        let r: std::result::Result<BakeConfig, _> = serde_json::from_str(r#"{ "bake_res": 100 }"#);
        assert!(r.is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let mut c = BakeConfig { samples: 0, ..Default::default() };
        assert!(c.validate().is_err());
        c.samples = 8193;
        assert!(c.validate().is_err());
        c.samples = 8192;
        c.validate().unwrap();
        c.shadow_bias = 1.5;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
        c.shadow_bias = 0.0;
        c.ao_bias = -0.1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let c = BakeConfig {
            bake_mode: BakeMode::NormalsConversion,
            conversion_mode: NormalsConversionMode::ObjectToTangent,
            transparent_pixels: true,
            ..Default::default()
        };
        c.save(&path).unwrap();
        assert_eq!(BakeConfig::load(&path).unwrap(), c);
    }

    #[test]
    fn test_titles() {
        assert_eq!(BakeMode::AmbientOcclusion.title(), "Baking Ambient Occlusion Map");
        assert_eq!(BakeMode::NormalsConversion.title(), "Converting Normals");
    }
}
