//! Seeded random sampling for emitters and events.
//!
//! Every random decision in a simulation goes through a [`Sampler`] whose
//! stream is derived from an explicit seed, so a scene replays identically.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::{PI, TAU};

/// Seeded random stream with geometric helpers.
///
/// ```ignore
/// let mut sampler = Sampler::new(42);
/// let dir = sampler.cone_direction(Vec3::Y, 0.3);
/// let pos = sampler.random_in_sphere(0.5);
/// ```
#[derive(Clone, Debug)]
pub struct Sampler {
    seed: u64,
    rng: SmallRng,
}

impl Sampler {
    /// Create a sampler from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent stream, e.g. one per particle id.
    pub fn derived(seed: u64, salt: u64) -> Self {
        Self::new(seed ^ u64::from(crate::noise::hash(salt as u32)) ^ (salt << 32))
    }

    /// Seed the stream was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restart the stream from its seed.
    pub fn restart(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
    }

    // ========== Random primitives ==========

    /// Random f32 in [0, 1).
    #[inline]
    pub fn random(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Random f32 in [min, max). Returns `min` for an empty range.
    #[inline]
    pub fn random_range(&mut self, min: f32, max: f32) -> f32 {
        if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        }
    }

    /// Symmetric jitter in [-amount/2, amount/2).
    #[inline]
    pub fn jitter(&mut self, amount: f32) -> f32 {
        if amount > 0.0 {
            (self.random() - 0.5) * amount
        } else {
            0.0
        }
    }

    // ========== Position helpers ==========

    /// Uniform random point inside a sphere of `radius` at the origin.
    pub fn random_in_sphere(&mut self, radius: f32) -> Vec3 {
        let r = radius * self.random().cbrt();
        self.random_direction() * r
    }

    /// Uniform random point on a sphere of `radius` at the origin.
    pub fn random_on_sphere(&mut self, radius: f32) -> Vec3 {
        self.random_direction() * radius
    }

    /// Random point inside an axis-aligned cube of `half_size`.
    pub fn random_in_cube(&mut self, half_size: Vec3) -> Vec3 {
        Vec3::new(
            self.random_range(-half_size.x, half_size.x),
            self.random_range(-half_size.y, half_size.y),
            self.random_range(-half_size.z, half_size.z),
        )
    }

    /// Random point inside a Y-aligned cylinder.
    pub fn random_in_cylinder(&mut self, radius: f32, half_height: f32) -> Vec3 {
        let disk = self.random_in_disk(radius);
        Vec3::new(disk.x, self.random_range(-half_height, half_height), disk.z)
    }

    /// Random point inside a disk in the XZ plane.
    pub fn random_in_disk(&mut self, radius: f32) -> Vec3 {
        let theta = self.random_range(0.0, TAU);
        let r = radius * self.random().sqrt();
        Vec3::new(r * theta.cos(), 0.0, r * theta.sin())
    }

    /// Uniform random point on a triangle.
    pub fn random_in_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
        let mut u = self.random();
        let mut v = self.random();
        if u + v > 1.0 {
            u = 1.0 - u;
            v = 1.0 - v;
        }
        a + (b - a) * u + (c - a) * v
    }

    // ========== Direction helpers ==========

    /// Unit vector uniformly distributed on the sphere.
    pub fn random_direction(&mut self) -> Vec3 {
        let z = self.random_range(-1.0, 1.0);
        let theta = self.random_range(0.0, TAU);
        let s = (1.0 - z * z).max(0.0).sqrt();
        Vec3::new(s * theta.cos(), s * theta.sin(), z)
    }

    /// Unit vector within a cone of `half_angle` radians around `axis`.
    ///
    /// A zero angle returns the axis itself; `PI` covers the whole sphere.
    pub fn cone_direction(&mut self, axis: Vec3, half_angle: f32) -> Vec3 {
        let axis = axis.try_normalize().unwrap_or(Vec3::Y);
        let half_angle = half_angle.clamp(0.0, PI);
        if half_angle == 0.0 {
            return axis;
        }
        // Uniform over the spherical cap
        let cos_max = half_angle.cos();
        let cos_t = 1.0 - self.random() * (1.0 - cos_max);
        let sin_t = (1.0 - cos_t * cos_t).max(0.0).sqrt();
        let phi = self.random_range(0.0, TAU);

        let (right, forward) = axis.any_orthonormal_pair();
        (right * (sin_t * phi.cos()) + forward * (sin_t * phi.sin()) + axis * cos_t).normalize()
    }

    /// Index drawn with probability proportional to `weights`.
    ///
    /// Returns `None` if every weight is zero.
    pub fn pick_weighted(&mut self, weights: &[f32]) -> Option<usize> {
        let total: f32 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut target = self.random() * total;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            if target < *w {
                return Some(i);
            }
            target -= w;
        }
        weights.iter().rposition(|w| *w > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = Sampler::new(7);
        let mut b = Sampler::new(7);
        for _ in 0..10 {
            assert_eq!(a.random(), b.random());
        }
    }

    #[test]
    fn test_restart() {
        let mut s = Sampler::new(99);
        let first = s.random();
        s.random();
        s.restart();
        assert_eq!(s.random(), first);
    }

    #[test]
    fn test_random_in_sphere_bounds() {
        let mut s = Sampler::new(1);
        for _ in 0..100 {
            assert!(s.random_in_sphere(0.5).length() <= 0.5 + 0.001);
        }
    }

    #[test]
    fn test_cone_direction_within_angle() {
        let mut s = Sampler::new(3);
        for _ in 0..200 {
            let d = s.cone_direction(Vec3::Y, 0.2);
            assert!((d.length() - 1.0).abs() < 0.001);
            assert!(d.dot(Vec3::Y) >= 0.2f32.cos() - 0.001);
        }
    }

    #[test]
    fn test_zero_cone_is_axis() {
        let mut s = Sampler::new(3);
        assert_eq!(s.cone_direction(Vec3::X * 2.0, 0.0), Vec3::X);
    }

    #[test]
    fn test_pick_weighted_skips_zero() {
        let mut s = Sampler::new(5);
        for _ in 0..50 {
            assert_eq!(s.pick_weighted(&[0.0, 1.0, 0.0]), Some(1));
        }
        assert_eq!(s.pick_weighted(&[0.0, 0.0]), None);
    }

    #[test]
    fn test_triangle_sample_on_plane() {
        let mut s = Sampler::new(11);
        for _ in 0..50 {
            let p = s.random_in_triangle(Vec3::ZERO, Vec3::X, Vec3::Z);
            assert!(p.y.abs() < 1e-6);
            assert!(p.x >= 0.0 && p.z >= 0.0 && p.x + p.z <= 1.0 + 1e-5);
        }
    }
}
