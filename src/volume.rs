//! Analytic volume shapes.
//!
//! Shapes restrict where fields act, define where volume emitters spawn, and
//! give the volume-axis field its frame of reference. All shapes are aligned
//! to the Y axis and positioned by a centre point.

use crate::sampling::Sampler;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Minimum extent below which a shape is treated as degenerate.
pub const MIN_EXTENT: f32 = 1e-6;

/// A closed volume in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum VolumeShape {
    /// Solid sphere.
    Sphere { center: Vec3, radius: f32 },
    /// Axis-aligned box.
    Cube { center: Vec3, half_extents: Vec3 },
    /// Y-aligned cylinder, `center` is the middle of the axis.
    Cylinder {
        center: Vec3,
        radius: f32,
        half_height: f32,
    },
    /// Y-aligned cone with its base disk at `center` and apex above it.
    Cone { center: Vec3, radius: f32, height: f32 },
    /// Torus lying in the XZ plane.
    Torus {
        center: Vec3,
        major_radius: f32,
        minor_radius: f32,
    },
}

impl VolumeShape {
    /// Centre point of the shape.
    pub fn center(&self) -> Vec3 {
        match *self {
            VolumeShape::Sphere { center, .. }
            | VolumeShape::Cube { center, .. }
            | VolumeShape::Cylinder { center, .. }
            | VolumeShape::Cone { center, .. }
            | VolumeShape::Torus { center, .. } => center,
        }
    }

    /// Whether the shape has zero (or invalid) volume.
    pub fn is_degenerate(&self) -> bool {
        let bad = |v: f32| !v.is_finite() || v < MIN_EXTENT;
        match *self {
            VolumeShape::Sphere { radius, .. } => bad(radius),
            VolumeShape::Cube { half_extents, .. } => {
                bad(half_extents.x) || bad(half_extents.y) || bad(half_extents.z)
            }
            VolumeShape::Cylinder {
                radius, half_height, ..
            } => bad(radius) || bad(half_height),
            VolumeShape::Cone { radius, height, .. } => bad(radius) || bad(height),
            VolumeShape::Torus {
                major_radius,
                minor_radius,
                ..
            } => bad(major_radius) || bad(minor_radius),
        }
    }

    /// Enclosed volume.
    pub fn volume(&self) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        match *self {
            VolumeShape::Sphere { radius, .. } => 4.0 / 3.0 * PI * radius.powi(3),
            VolumeShape::Cube { half_extents, .. } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            VolumeShape::Cylinder {
                radius, half_height, ..
            } => PI * radius * radius * 2.0 * half_height,
            VolumeShape::Cone { radius, height, .. } => PI * radius * radius * height / 3.0,
            VolumeShape::Torus {
                major_radius,
                minor_radius,
                ..
            } => 2.0 * PI * PI * major_radius * minor_radius * minor_radius,
        }
    }

    /// Whether `p` lies inside or on the boundary.
    pub fn contains(&self, p: Vec3) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let local = p - self.center();
        match *self {
            VolumeShape::Sphere { radius, .. } => local.length_squared() <= radius * radius,
            VolumeShape::Cube { half_extents, .. } => {
                local.abs().cmple(half_extents).all()
            }
            VolumeShape::Cylinder {
                radius, half_height, ..
            } => {
                local.y.abs() <= half_height
                    && local.x * local.x + local.z * local.z <= radius * radius
            }
            VolumeShape::Cone { radius, height, .. } => {
                if local.y < 0.0 || local.y > height {
                    return false;
                }
                let r_at = radius * (1.0 - local.y / height);
                local.x * local.x + local.z * local.z <= r_at * r_at
            }
            VolumeShape::Torus {
                major_radius,
                minor_radius,
                ..
            } => {
                let ring = (local.x * local.x + local.z * local.z).sqrt() - major_radius;
                ring * ring + local.y * local.y <= minor_radius * minor_radius
            }
        }
    }

    /// Closest point on the shape's central axis (or ring for a torus).
    ///
    /// Used by the volume-axis field to split a sample into along-axis and
    /// away-from-axis components.
    pub fn axis_point(&self, p: Vec3) -> Vec3 {
        let c = self.center();
        match *self {
            VolumeShape::Torus { major_radius, .. } => {
                let planar = Vec3::new(p.x - c.x, 0.0, p.z - c.z);
                let dir = planar.try_normalize().unwrap_or(Vec3::X);
                c + dir * major_radius
            }
            _ => Vec3::new(c.x, p.y, c.z),
        }
    }

    /// Uniform random point inside the shape.
    pub fn sample(&self, sampler: &mut Sampler) -> Vec3 {
        let c = self.center();
        match *self {
            VolumeShape::Sphere { radius, .. } => c + sampler.random_in_sphere(radius),
            VolumeShape::Cube { half_extents, .. } => c + sampler.random_in_cube(half_extents),
            VolumeShape::Cylinder {
                radius, half_height, ..
            } => c + sampler.random_in_cylinder(radius, half_height),
            // Rejection sampling from the bounding region; bounded attempts.
            VolumeShape::Cone { radius, height, .. } => {
                for _ in 0..32 {
                    let disk = sampler.random_in_disk(radius);
                    let p = c + Vec3::new(disk.x, sampler.random_range(0.0, height), disk.z);
                    if self.contains(p) {
                        return p;
                    }
                }
                c
            }
            VolumeShape::Torus {
                major_radius,
                minor_radius,
                ..
            } => {
                let reach = major_radius + minor_radius;
                for _ in 0..32 {
                    let p = c + sampler.random_in_cube(Vec3::new(reach, minor_radius, reach));
                    if self.contains(p) {
                        return p;
                    }
                }
                c + Vec3::new(major_radius, 0.0, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_contains() {
        let s = VolumeShape::Sphere {
            center: Vec3::new(1.0, 0.0, 0.0),
            radius: 0.5,
        };
        assert!(s.contains(Vec3::new(1.2, 0.1, 0.0)));
        assert!(!s.contains(Vec3::ZERO));
    }

    #[test]
    fn test_degenerate_shapes_contain_nothing() {
        let s = VolumeShape::Cube {
            center: Vec3::ZERO,
            half_extents: Vec3::new(1.0, 0.0, 1.0),
        };
        assert!(s.is_degenerate());
        assert!(!s.contains(Vec3::ZERO));
        assert_eq!(s.volume(), 0.0);
    }

    #[test]
    fn test_cone_tapers() {
        let cone = VolumeShape::Cone {
            center: Vec3::ZERO,
            radius: 1.0,
            height: 2.0,
        };
        assert!(cone.contains(Vec3::new(0.9, 0.0, 0.0)));
        assert!(!cone.contains(Vec3::new(0.9, 1.5, 0.0)));
        assert!(cone.contains(Vec3::new(0.1, 1.5, 0.0)));
    }

    #[test]
    fn test_samples_stay_inside() {
        let shapes = [
            VolumeShape::Sphere { center: Vec3::ONE, radius: 0.3 },
            VolumeShape::Cylinder { center: Vec3::ZERO, radius: 0.5, half_height: 1.0 },
            VolumeShape::Torus { center: Vec3::ZERO, major_radius: 1.0, minor_radius: 0.25 },
        ];
        let mut sampler = Sampler::new(17);
        for shape in &shapes {
            for _ in 0..50 {
                let p = shape.sample(&mut sampler);
                assert!(shape.contains(p), "{:?} escaped at {:?}", shape, p);
            }
        }
    }

    #[test]
    fn test_torus_axis_point_on_ring() {
        let torus = VolumeShape::Torus {
            center: Vec3::ZERO,
            major_radius: 2.0,
            minor_radius: 0.5,
        };
        let ap = torus.axis_point(Vec3::new(0.0, 1.0, 3.0));
        assert!((ap - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-5);
    }
}
