//! Collision surfaces and swept particle response.
//!
//! A particle's motion over a step is treated as the segment from its
//! previous position to its integrated position. The first crossing of the
//! surface along that segment wins. At the contact the velocity is split into
//! normal and tangential parts:
//!
//! ```text
//! normal'     = -resilience * normal
//! tangential' = (1 - friction) * tangential
//! ```
//!
//! The particle is placed on the surface plus `offset` along the normal and
//! the unused part of the step continues with the new velocity. Further hits
//! are resolved the same way up to [`MAX_COLLISION_PASSES`].
//!
//! Geometry is only edited between steps, so a surface is read-only while
//! particles are resolved against it and can be shared across threads.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Maximum resolution passes per particle per step.
pub const MAX_COLLISION_PASSES: u32 = 4;

/// Tolerance for "already on the surface".
const CONTACT_EPSILON: f32 = 1e-5;

/// Collider shape in world space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CollisionGeometry {
    /// One-sided infinite plane; particles collide from the `normal` side.
    Plane { point: Vec3, normal: Vec3 },
    /// Solid sphere; particles collide from outside.
    Sphere { center: Vec3, radius: f32 },
    /// Two-sided triangle mesh.
    Mesh { triangles: Vec<[Vec3; 3]> },
}

impl CollisionGeometry {
    fn name(&self) -> &'static str {
        match self {
            CollisionGeometry::Plane { .. } => "plane",
            CollisionGeometry::Sphere { .. } => "sphere",
            CollisionGeometry::Mesh { .. } => "mesh",
        }
    }

    fn degeneracy(&self) -> Option<&'static str> {
        match self {
            CollisionGeometry::Plane { point, normal } => {
                (!point.is_finite() || normal.length() < 1e-6).then_some("zero plane normal")
            }
            CollisionGeometry::Sphere { center, radius } => {
                (!center.is_finite() || !radius.is_finite() || *radius <= 0.0).then_some("non-positive radius")
            }
            CollisionGeometry::Mesh { triangles } => triangles
                .iter()
                .all(|t| (t[1] - t[0]).cross(t[2] - t[0]).length_squared() < 1e-12)
                .then_some("mesh has no non-degenerate triangles"),
        }
    }
}

/// Collision surface parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionConfig {
    pub geometry: CollisionGeometry,
    /// Fraction of tangential velocity removed, in [0, 1].
    #[serde(default)]
    pub friction: f32,
    /// Fraction of normal velocity bounced back, in [0, 2].
    #[serde(default = "default_resilience")]
    pub resilience: f32,
    /// Distance from the surface at which particles are stopped.
    #[serde(default)]
    pub offset: f32,
}

fn default_resilience() -> f32 {
    1.0
}

impl CollisionConfig {
    pub fn new(geometry: CollisionGeometry) -> Self {
        Self {
            geometry,
            friction: 0.0,
            resilience: 1.0,
            offset: 0.0,
        }
    }

    /// Ground plane through `point` facing +Y.
    pub fn ground(height: f32) -> Self {
        Self::new(CollisionGeometry::Plane {
            point: Vec3::new(0.0, height, 0.0),
            normal: Vec3::Y,
        })
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.clamp(0.0, 1.0);
        self
    }

    pub fn with_resilience(mut self, resilience: f32) -> Self {
        self.resilience = resilience.clamp(0.0, 2.0);
        self
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset.max(0.0);
        self
    }
}

/// Outcome of resolving one particle against one surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionResult {
    pub position: Vec3,
    pub velocity: Vec3,
    pub collided: bool,
    /// Number of contacts resolved this step.
    pub hits: u32,
}

/// First crossing along a segment.
#[derive(Clone, Copy, Debug)]
struct Hit {
    /// Fraction of the segment travelled before the contact.
    t: f32,
    /// Surface normal facing the incoming side.
    normal: Vec3,
    /// Where the particle is placed (surface plus offset).
    rest: Vec3,
}

/// A collision surface instance.
#[derive(Debug)]
pub struct CollisionSurface {
    name: String,
    config: CollisionConfig,
    warned: AtomicBool,
}

impl Clone for CollisionSurface {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            warned: AtomicBool::new(self.warned.load(Ordering::Relaxed)),
        }
    }
}

impl CollisionSurface {
    pub fn new(name: impl Into<String>, config: CollisionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            warned: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// Replace the parameters (animated geometry). Only between steps.
    pub fn set_config(&mut self, config: CollisionConfig) {
        self.config = config;
        self.warned.store(false, Ordering::Relaxed);
    }

    /// Resolve a particle that moved from `start` to `end` over `dt`.
    ///
    /// `velocity` is the particle's velocity at the end of the step.
    pub fn resolve(&self, start: Vec3, end: Vec3, velocity: Vec3, dt: f32) -> CollisionResult {
        let mut result = CollisionResult {
            position: end,
            velocity,
            collided: false,
            hits: 0,
        };
        if let Some(reason) = self.config.geometry.degeneracy() {
            if !self.warned.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "{} collision '{}' is ignored: {}",
                    self.config.geometry.name(),
                    self.name,
                    reason
                );
            }
            return result;
        }

        let friction = self.config.friction.clamp(0.0, 1.0);
        let resilience = self.config.resilience.clamp(0.0, 2.0);
        let mut from = start;
        let mut to = end;
        let mut remaining = dt.max(0.0);
        let mut last_normal = Vec3::ZERO;

        for _ in 0..MAX_COLLISION_PASSES {
            let Some(hit) = self.first_hit(from, to) else {
                result.position = to;
                return result;
            };
            result.collided = true;
            result.hits += 1;
            last_normal = hit.normal;

            let vn = result.velocity.dot(hit.normal);
            if vn < 0.0 {
                let normal = hit.normal * vn;
                let tangential = result.velocity - normal;
                result.velocity = -resilience * normal + (1.0 - friction) * tangential;
            }
            log::trace!(
                "'{}' hit at {:?}, velocity now {:?}",
                self.name,
                hit.rest,
                result.velocity
            );

            remaining *= 1.0 - hit.t;
            from = hit.rest;
            to = hit.rest + result.velocity * remaining;
            result.position = hit.rest;
        }

        // Out of passes: slide along the last contact for the rest of the
        // step unless that slide would cross the surface again.
        let motion = result.velocity * remaining;
        let slide = result.position + (motion - last_normal * motion.dot(last_normal));
        if self.first_hit(result.position, slide).is_none() {
            result.position = slide;
        }
        result
    }

    fn first_hit(&self, a: Vec3, b: Vec3) -> Option<Hit> {
        let offset = self.config.offset.max(0.0);
        match &self.config.geometry {
            CollisionGeometry::Plane { point, normal } => {
                let n = normal.normalize();
                let da = (a - *point).dot(n) - offset;
                let db = (b - *point).dot(n) - offset;
                if da < -CONTACT_EPSILON || db >= 0.0 {
                    return None;
                }
                let t = if da <= 0.0 { 0.0 } else { da / (da - db) };
                let contact = a.lerp(b, t);
                let rest = contact - n * ((contact - *point).dot(n) - offset);
                Some(Hit { t, normal: n, rest })
            }
            CollisionGeometry::Sphere { center, radius } => {
                let r = radius + offset;
                let rel = a - *center;
                let c = rel.length_squared() - r * r;
                if c < -2.0 * r * CONTACT_EPSILON {
                    // Started inside.
                    return None;
                }
                let d = b - a;
                let qa = d.length_squared();
                if qa == 0.0 {
                    return None;
                }
                let qb = 2.0 * rel.dot(d);
                let disc = qb * qb - 4.0 * qa * c;
                if disc < 0.0 {
                    return None;
                }
                let t = ((-qb - disc.sqrt()) / (2.0 * qa)).max(0.0);
                if t > 1.0 || qb >= 0.0 {
                    return None;
                }
                let contact = a + d * t;
                let normal = (contact - *center).try_normalize()?;
                Some(Hit {
                    t,
                    normal,
                    rest: *center + normal * r,
                })
            }
            CollisionGeometry::Mesh { triangles } => {
                let mut best: Option<Hit> = None;
                for tri in triangles {
                    if let Some((t, face)) = segment_triangle(a, b, tri) {
                        if best.map_or(true, |h| t < h.t) {
                            let n = if (a - tri[0]).dot(face) >= 0.0 { face } else { -face };
                            let contact = a.lerp(b, t);
                            best = Some(Hit {
                                t,
                                normal: n,
                                rest: contact + n * offset.max(CONTACT_EPSILON),
                            });
                        }
                    }
                }
                best
            }
        }
    }
}

/// Segment/triangle intersection (Moller-Trumbore). Returns the segment
/// fraction and the unit face normal.
fn segment_triangle(a: Vec3, b: Vec3, tri: &[Vec3; 3]) -> Option<(f32, Vec3)> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let d = b - a;
    let p = d.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let s = a - tri[0];
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = d.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let face = e1.cross(e2).try_normalize()?;
    Some((t, face))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground(resilience: f32, friction: f32) -> CollisionSurface {
        CollisionSurface::new(
            "ground",
            CollisionConfig::ground(0.0)
                .with_resilience(resilience)
                .with_friction(friction),
        )
    }

    #[test]
    fn test_elastic_reflection() {
        let surface = ground(1.0, 0.0);
        let v = Vec3::new(2.0, -3.0, 0.0);
        let r = surface.resolve(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.4, -0.2, 0.0), v, 0.2);
        assert!(r.collided);
        assert_eq!(r.velocity.y, 3.0);
        assert_eq!(r.velocity.x, 2.0);
        assert!(r.position.y >= 0.0);
    }

    #[test]
    fn test_zero_resilience_stops_normal_motion() {
        let surface = ground(0.0, 0.5);
        let r = surface.resolve(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(1.0, -2.0, 0.0), 1.0);
        assert!(r.collided);
        assert_eq!(r.velocity.y, 0.0);
        assert!((r.velocity.x - 0.5).abs() < 1e-6);
        assert!(r.position.y.abs() < 1e-5);
    }

    #[test]
    fn test_no_tunneling_through_thin_plane() {
        let surface = ground(0.5, 0.0);
        // Moves 200 units in one step.
        let r = surface.resolve(Vec3::new(0.0, 100.0, 0.0), Vec3::new(0.0, -100.0, 0.0), Vec3::new(0.0, -200.0, 0.0), 1.0);
        assert!(r.collided);
        assert!(r.position.y >= -1e-4);
        assert!((r.velocity.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_offset_keeps_distance() {
        let surface = CollisionSurface::new(
            "g",
            CollisionConfig::ground(0.0).with_offset(0.25).with_resilience(0.0),
        );
        let r = surface.resolve(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -2.0, 0.0), 1.0);
        assert!((r.position.y - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_deflects() {
        let surface = CollisionSurface::new(
            "ball",
            CollisionConfig::new(CollisionGeometry::Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            }),
        );
        let r = surface.resolve(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0), 1.0);
        assert!(r.collided);
        assert!(r.velocity.x < 0.0);
        assert!(r.position.length() >= 1.0 - 1e-4);
    }

    #[test]
    fn test_mesh_hit_and_miss() {
        let tri = [Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 2.0)];
        let surface = CollisionSurface::new(
            "m",
            CollisionConfig::new(CollisionGeometry::Mesh { triangles: vec![tri] }).with_resilience(0.0),
        );
        let hit = surface.resolve(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -2.0, 0.0), 1.0);
        assert!(hit.collided);
        assert!(hit.position.y > 0.0);

        let miss = surface.resolve(Vec3::new(5.0, 1.0, 0.0), Vec3::new(5.0, -1.0, 0.0), Vec3::new(0.0, -2.0, 0.0), 1.0);
        assert!(!miss.collided);
        assert_eq!(miss.position, Vec3::new(5.0, -1.0, 0.0));
    }

    #[test]
    fn test_hit_from_resting_contact() {
        let surface = ground(1.0, 0.0);
        let r = surface.resolve(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -1.0, 0.0), 1.0);
        assert!(r.hits <= MAX_COLLISION_PASSES);
        assert!(r.position.y >= -1e-5);
    }

    #[test]
    fn test_exhausted_passes_keep_tangential_motion() {
        // Two facing sheets 0.1 apart: a fast vertical bounce uses up every pass.
        let sheet = |y: f32| [Vec3::new(-100.0, y, -100.0), Vec3::new(100.0, y, -100.0), Vec3::new(0.0, y, 100.0)];
        let surface = CollisionSurface::new(
            "slot",
            CollisionConfig::new(CollisionGeometry::Mesh {
                triangles: vec![sheet(0.0), sheet(0.1)],
            }),
        );
        let start = Vec3::new(0.0, 0.05, 0.0);
        let v = Vec3::new(1.0, -10.0, 0.0);
        let r = surface.resolve(start, start + v, v, 1.0);

        assert_eq!(r.hits, MAX_COLLISION_PASSES);
        assert!((r.position.x - 1.0).abs() < 1e-4);
        assert!(r.position.y > 0.0 && r.position.y < 0.1);
        assert!((r.velocity.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_geometry_is_ignored() {
        let surface = CollisionSurface::new(
            "bad",
            CollisionConfig::new(CollisionGeometry::Plane {
                point: Vec3::ZERO,
                normal: Vec3::ZERO,
            }),
        );
        let r = surface.resolve(Vec3::Y, Vec3::NEG_Y, Vec3::NEG_Y, 1.0);
        assert!(!r.collided);
        assert_eq!(r.position, Vec3::NEG_Y);
    }
}
