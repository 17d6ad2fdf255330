//! Output naming, background composite, PNG encoding and persistence.

use std::io::Cursor;
use std::path::PathBuf;

use image::{ImageFormat, RgbaImage};

use super::group::BakeGroup;
use crate::config::{BakeConfig, BakeMode, NameMode, NormalsConversionMode};
use crate::render::{PixelBuffer, RenderBackend, TargetId};
use crate::shading::encode_normal;
use crate::util::{Result, Vec3, Vec4};

pub const EXTENSION: &str = "png";

/// Pick the name a group is written under.
pub fn choose_name<'a>(candidates: &[&'a str], mode: NameMode) -> Option<&'a str> {
    let mut names = candidates.to_vec();
    match mode {
        NameMode::Shortest => names.sort_by_key(|n| n.len()),
        NameMode::Longest => names.sort_by_key(|n| std::cmp::Reverse(n.len())),
        NameMode::Alphabetical => names.sort(),
        NameMode::Whatever => {}
    }
    names.first().copied()
}

/// Suffix marking what a file contains.
pub fn suffix(config: &BakeConfig) -> &'static str {
    match (config.bake_mode, config.conversion_mode) {
        (BakeMode::BentNormal, _) => "_BentNormal",
        (BakeMode::AmbientOcclusion, _) => "_AmbientOcclusion",
        (BakeMode::NormalsConversion, NormalsConversionMode::TangentToObject) => "_Normal_OS",
        (BakeMode::NormalsConversion, NormalsConversionMode::ObjectToTangent) => "_Normal_TS",
    }
}

/// Replace path separators so a name stays a single file name.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// File name (no directory) for a group.
pub fn file_name(group: &BakeGroup, config: &BakeConfig) -> String {
    let candidates: Vec<&str> = group.instances.iter().map(|i| i.name.as_str()).collect();
    let base = choose_name(&candidates, config.name_mode).unwrap_or("bake");
    format!("{}{}.{EXTENSION}", sanitize(base), suffix(config))
}

/// Colour under empty texels: transparent, flat normal, or white for AO.
pub fn background(config: &BakeConfig) -> Vec4 {
    if config.transparent_pixels {
        return Vec4::ZERO;
    }
    match config.bake_mode {
        BakeMode::AmbientOcclusion => Vec4::ONE,
        BakeMode::BentNormal | BakeMode::NormalsConversion => encode_normal(Vec3::Z).extend(1.0),
    }
}

/// Quantize to RGBA8 with V pointing up (image row 0 is the top).
pub fn to_rgba8(mut pixels: PixelBuffer) -> RgbaImage {
    pixels.flip_rows();
    let bytes: Vec<[u8; 4]> = pixels
        .pixels
        .iter()
        .map(|p| (p.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round().to_array().map(|c| c as u8))
        .collect();
    RgbaImage::from_raw(pixels.width, pixels.height, bytemuck::cast_slice(&bytes).to_vec())
        .unwrap_or_else(|| RgbaImage::new(pixels.width, pixels.height))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(png_bytes)
}

/// Composite `group.result` over the background in `scratch`, read it back
/// and encode it. Returns the path relative to storage and the PNG bytes.
pub fn render_group<B: RenderBackend + ?Sized>(
    group: &BakeGroup,
    config: &BakeConfig,
    backend: &mut B,
    scratch: TargetId,
) -> Result<(PathBuf, Vec<u8>)> {
    backend.clear(scratch, background(config))?;
    backend.composite(scratch, group.result)?;
    let pixels = backend.read_pixels(scratch)?;
    let bytes = encode_png(&to_rgba8(pixels))?;
    Ok((config.output_path.join(file_name(group, config)), bytes))
}
