//! Sample directions on the unit sphere.

use std::f32::consts::PI;

use crate::util::Vec3;

/// `n` unit vectors spread evenly over the sphere (Fibonacci spiral).
///
/// The set depends only on `n`, so a bake is reproducible.
pub fn sphere_directions(n: u32) -> Vec<Vec3> {
    if n == 0 {
        return Vec::new();
    }
    let offset = 2.0 / n as f32;
    let increment = PI * (3.0 - 5f32.sqrt());
    (0..n)
        .map(|k| {
            let k = k as f32;
            let y = k * offset - 1.0 + offset * 0.5;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let phi = k * increment;
            Vec3::new(r * phi.cos(), y, r * phi.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_length_and_deterministic() {
        for n in [1, 2, 7, 64, 1024] {
            let dirs = sphere_directions(n);
            assert_eq!(dirs.len(), n as usize);
            assert!(dirs.iter().all(|d| (d.length() - 1.0).abs() < 1e-5));
            assert_eq!(dirs, sphere_directions(n));
        }
        assert!(sphere_directions(0).is_empty());
    }

    #[test]
    fn test_heights_symmetric() {
        let dirs = sphere_directions(64);
        for k in 0..32 {
            assert!((dirs[k].y + dirs[63 - k].y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_roughly_balanced() {
        let dirs = sphere_directions(1024);
        let mean = dirs.iter().copied().sum::<Vec3>() / dirs.len() as f32;
        assert!(mean.length() < 0.05);
        let upper = dirs.iter().filter(|d| d.y > 0.0).count();
        assert_eq!(upper, 512);
    }

    #[test]
    fn test_single_direction_is_equator() {
        assert_eq!(sphere_directions(1), vec![Vec3::new(1.0, 0.0, 0.0)]);
    }
}
