//! CPU-side material textures (normal maps).

use std::path::Path;

use crate::util::{Result, Vec2, Vec4};

/// Linear RGBA float texture. Row 0 is at v = 0 (bottom).
#[derive(Clone, Debug)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl Texture {
    /// Wrap `pixels` (row-major, `width * height` texels). A buffer of any
    /// other length samples as zero.
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<Vec4>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            pixels,
        }
    }

    /// Single-colour 1x1 texture.
    pub fn solid(name: impl Into<String>, color: Vec4) -> Self {
        Self::new(name, 1, 1, vec![color])
    }

    /// Texture filled by `f(u, v)` sampled at texel centres.
    pub fn from_fn(name: impl Into<String>, width: u32, height: u32, f: impl Fn(Vec2) -> Vec4) -> Self {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32);
                pixels.push(f(uv));
            }
        }
        Self::new(name, width, height, pixels)
    }

    /// Load an image file. Values are taken as stored (no sRGB decode),
    /// and rows are flipped so that v points up.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)?.to_rgba32f();
        let (width, height) = img.dimensions();
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in (0..height).rev() {
            for x in 0..width {
                let p = img.get_pixel(x, y).0;
                pixels.push(Vec4::from_array(p));
            }
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, width, height, pixels))
    }

    /// Pixel buffer matches the declared size.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.width as usize * self.height as usize
    }

    #[inline]
    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.rem_euclid(self.height as i64) as usize;
        self.pixels[y * self.width as usize + x]
    }

    /// Bilinear sample with repeat wrapping.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if !self.is_valid() {
            return Vec4::ZERO;
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let b = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        a.lerp(b, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_sample() {
        let t = Texture::solid("flat", Vec4::new(0.5, 0.5, 1.0, 1.0));
        assert_eq!(t.sample(Vec2::new(0.3, 0.9)), Vec4::new(0.5, 0.5, 1.0, 1.0));
    }

    #[test]
    fn test_mismatched_buffer_samples_zero() {
        let short = Texture::new("short", 4, 4, vec![Vec4::ONE; 3]);
        assert!(!short.is_valid());
        assert_eq!(short.sample(Vec2::new(0.9, 0.9)), Vec4::ZERO);

        let mut grown = Texture::solid("grown", Vec4::ONE);
        grown.width = 8;
        assert_eq!(grown.sample(Vec2::splat(0.5)), Vec4::ZERO);
        assert_eq!(Texture::new("empty", 0, 0, Vec::new()).sample(Vec2::ZERO), Vec4::ZERO);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let t = Texture::new("ramp", 2, 1, vec![Vec4::ZERO, Vec4::ONE]);
        // Halfway between the two texel centres
        let v = t.sample(Vec2::new(0.5, 0.5));
        assert!((v.x - 0.5).abs() < 1e-6);
        // At a texel centre
        let v = t.sample(Vec2::new(0.25, 0.5));
        assert!(v.x.abs() < 1e-6);
    }

    #[test]
    fn test_from_fn_orientation() {
        let t = Texture::from_fn("v", 1, 4, |uv| Vec4::splat(uv.y));
        assert!(t.pixels[0].x < t.pixels[3].x);
    }
}
