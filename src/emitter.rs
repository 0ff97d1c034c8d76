//! Particle emitters.
//!
//! An emitter is asked once per simulation step how many particles to create
//! and where. The expected count is `rate * dt * size`, where `size` is the
//! surface area, curve length or volume when `scale_rate_by_size` is set and
//! 1 otherwise. The fractional remainder carries into the next step, so an
//! emitter with `rate = 10` stepped at `dt = 0.1` creates exactly one particle
//! per step.
//!
//! # Emitter Types
//!
//! | Type | Spawn location | Direction |
//! |------|----------------|-----------|
//! | [`EmitterKind::Omni`] | Emitter position | Uniform over the sphere |
//! | [`EmitterKind::Directional`] | Emitter position | Cone around `direction` |
//! | [`EmitterKind::Surface`] | Random point on the triangles | Cone around the face normal |
//! | [`EmitterKind::Curve`] | Random point on the polyline | Cone around `direction` |
//! | [`EmitterKind::Volume`] | Random point inside the shape | Cone around the outward direction |
//!
//! # Velocity Control
//!
//! - `direction` - primary direction (normalized on use)
//! - `speed` - base speed, jittered by `speed_random`
//! - `spread` - cone half-angle as a fraction of PI (0 = laser, 1 = all directions)
//! - `inherit_velocity` - fraction of the emitter's own velocity added
//!
//! # Example
//!
//! ```ignore
//! // Fountain shooting upward
//! let fountain = EmitterConfig::directional(Vec3::Y, 1000.0)
//!     .with_position(Vec3::new(0.0, -0.5, 0.0))
//!     .with_speed(2.0)
//!     .with_spread(0.1);
//! ```

use crate::particle::NewParticle;
use crate::sampling::Sampler;
use crate::volume::VolumeShape;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where particles spawn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmitterKind {
    /// Single point, random directions.
    Omni,
    /// Single point, cone around `direction`.
    Directional,
    /// Triangles relative to the emitter position. Emission follows each
    /// face's normal (counter-clockwise winding).
    Surface { triangles: Vec<[Vec3; 3]> },
    /// Polyline relative to the emitter position.
    Curve { points: Vec<Vec3> },
    /// Volume shape relative to the emitter position.
    Volume { shape: VolumeShape },
}

impl EmitterKind {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            EmitterKind::Omni => "omni",
            EmitterKind::Directional => "directional",
            EmitterKind::Surface { .. } => "surface",
            EmitterKind::Curve { .. } => "curve",
            EmitterKind::Volume { .. } => "volume",
        }
    }
}

/// When the random stream restarts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cycle", content = "frames", rename_all = "snake_case")]
pub enum CyclePolicy {
    /// The stream never repeats.
    #[default]
    None,
    /// The stream restarts every `n` frames, so emission repeats with that period.
    Frames(u32),
}

/// Emitter parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub kind: EmitterKind,
    #[serde(default)]
    pub position: Vec3,
    /// The emitter's own velocity, used by `inherit_velocity`.
    #[serde(default)]
    pub velocity: Vec3,
    /// Particles per second (per unit size when scaled).
    pub rate: f32,
    #[serde(default = "default_direction")]
    pub direction: Vec3,
    #[serde(default)]
    pub spread: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub speed_random: f32,
    #[serde(default)]
    pub inherit_velocity: f32,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default)]
    pub scale_rate_by_size: bool,
    /// Spread new particles across the step instead of spawning them together.
    #[serde(default = "default_true")]
    pub sub_step_offset: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub cycle: CyclePolicy,
}

fn default_direction() -> Vec3 {
    Vec3::Y
}

fn default_speed() -> f32 {
    1.0
}

fn default_mass() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl EmitterConfig {
    /// Emitter of the given kind and rate at the origin.
    pub fn new(kind: EmitterKind, rate: f32) -> Self {
        Self {
            kind,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rate,
            direction: Vec3::Y,
            spread: 0.0,
            speed: 1.0,
            speed_random: 0.0,
            inherit_velocity: 0.0,
            mass: 1.0,
            scale_rate_by_size: false,
            sub_step_offset: true,
            seed: 0,
            cycle: CyclePolicy::None,
        }
    }

    // =========================================================================
    // PRESETS
    // =========================================================================

    /// Point emitter firing in all directions.
    pub fn omni(rate: f32) -> Self {
        Self::new(EmitterKind::Omni, rate)
    }

    /// Point emitter firing along `direction`.
    pub fn directional(direction: Vec3, rate: f32) -> Self {
        Self::new(EmitterKind::Directional, rate).with_direction(direction)
    }

    /// Surface emitter over a triangle list.
    pub fn surface(triangles: Vec<[Vec3; 3]>, rate: f32) -> Self {
        Self::new(EmitterKind::Surface { triangles }, rate)
    }

    /// Curve emitter along a polyline.
    pub fn curve(points: Vec<Vec3>, rate: f32) -> Self {
        Self::new(EmitterKind::Curve { points }, rate)
    }

    /// Volume emitter.
    pub fn volume(shape: VolumeShape, rate: f32) -> Self {
        Self::new(EmitterKind::Volume { shape }, rate)
    }

    // =========================================================================
    // BUILDER METHODS
    // =========================================================================

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.direction = direction;
        self
    }

    /// Cone half-angle as a fraction of PI, clamped to [0, 1].
    pub fn with_spread(mut self, spread: f32) -> Self {
        self.spread = spread.clamp(0.0, 1.0);
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_speed_random(mut self, speed_random: f32) -> Self {
        self.speed_random = speed_random.max(0.0);
        self
    }

    pub fn with_inherit_velocity(mut self, inherit: f32) -> Self {
        self.inherit_velocity = inherit;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cycle(mut self, cycle: CyclePolicy) -> Self {
        self.cycle = cycle;
        self
    }

    /// Multiply the rate by area, length or volume.
    pub fn scaled_by_size(mut self) -> Self {
        self.scale_rate_by_size = true;
        self
    }

    /// Spawn every particle of a step at the same instant.
    pub fn without_sub_step_offset(mut self) -> Self {
        self.sub_step_offset = false;
        self
    }

    /// Area, length or volume of the emitting geometry; 1 for point emitters.
    pub fn size(&self) -> f32 {
        match &self.kind {
            EmitterKind::Omni | EmitterKind::Directional => 1.0,
            EmitterKind::Surface { triangles } => triangles.iter().map(triangle_area).sum(),
            EmitterKind::Curve { points } => points.windows(2).map(|w| w[0].distance(w[1])).sum(),
            EmitterKind::Volume { shape } => shape.volume(),
        }
    }

    /// Reason this emitter cannot produce particles, if any.
    pub fn degeneracy(&self) -> Option<&'static str> {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Some("rate is negative or not finite");
        }
        if !self.position.is_finite() || !self.direction.is_finite() || !self.speed.is_finite() {
            return Some("non-finite position, direction or speed");
        }
        if self.mass <= 0.0 {
            return Some("particle mass is not positive");
        }
        match &self.kind {
            EmitterKind::Directional | EmitterKind::Curve { .. } if self.direction.length() < 1e-6 => {
                Some("zero emission direction")
            }
            EmitterKind::Surface { .. } if self.size() <= 0.0 => Some("surface has zero area"),
            EmitterKind::Curve { .. } if self.size() <= 0.0 => Some("curve has zero length"),
            EmitterKind::Volume { shape } if shape.is_degenerate() => Some("zero-volume shape"),
            _ => None,
        }
    }
}

fn triangle_area(t: &[Vec3; 3]) -> f32 {
    0.5 * (t[1] - t[0]).cross(t[2] - t[0]).length()
}

/// Identifies one emission call so the random stream is reproducible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmitStep {
    /// Step length in seconds.
    pub dt: f32,
    /// Frame being simulated.
    pub frame: i64,
    /// Oversample index within the frame.
    pub substep: u32,
    /// Oversamples per frame.
    pub substeps: u32,
}

/// An emitter instance.
///
/// The random stream for each step is derived from the seed and the step's
/// position in the timeline, so a runup that resumes from a cached frame
/// emits exactly what a full replay would. The fractional carry belongs to
/// the emitter's connection to a particle system and is passed in.
#[derive(Debug)]
pub struct Emitter {
    name: String,
    config: EmitterConfig,
    warned: AtomicBool,
}

impl Clone for Emitter {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            warned: AtomicBool::new(self.warned.load(Ordering::Relaxed)),
        }
    }
}

impl Emitter {
    pub fn new(name: impl Into<String>, config: EmitterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            warned: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Replace the parameters.
    pub fn set_config(&mut self, config: EmitterConfig) {
        self.config = config;
        self.warned.store(false, Ordering::Relaxed);
    }

    /// Number of particles to create this step. Updates `carry`.
    ///
    /// The fractional part of `rate * dt` accumulates in `carry` and becomes
    /// a whole particle once it reaches one. Each step emits the floor or the
    /// ceiling of `rate * dt`, `carry` stays in `[0, 1)` and the long-run
    /// average is exactly the rate. Which steps receive the extra particle
    /// depends only on the timeline, not on the random stream, so a resumed
    /// runup matches a full replay.
    pub fn count(&self, dt: f32, carry: &mut f32) -> usize {
        if let Some(reason) = self.config.degeneracy() {
            if !self.warned.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "{} emitter '{}' emits nothing: {}",
                    self.config.kind.name(),
                    self.name,
                    reason
                );
            }
            return 0;
        }
        let scale = if self.config.scale_rate_by_size {
            self.config.size()
        } else {
            1.0
        };
        let expected = carry.clamp(0.0, 1.0) + self.config.rate * dt.max(0.0) * scale;
        let count = expected.floor();
        *carry = expected - count;
        count as usize
    }

    fn sampler(&self, step: &EmitStep) -> Sampler {
        let frame = match self.config.cycle {
            CyclePolicy::Frames(n) if n > 0 => step.frame.rem_euclid(i64::from(n)),
            _ => step.frame,
        };
        let key = (frame as u64)
            .wrapping_mul(u64::from(step.substeps.max(1)))
            .wrapping_add(u64::from(step.substep));
        Sampler::derived(self.config.seed, key)
    }

    /// New particles for one step.
    pub fn emit(&self, step: &EmitStep, carry: &mut f32) -> Vec<NewParticle> {
        let count = self.count(step.dt, carry);
        if count == 0 {
            return Vec::new();
        }
        let mut sampler = self.sampler(step);
        let cfg = &self.config;
        let half_angle = cfg.spread.clamp(0.0, 1.0) * PI;

        let weights: Vec<f32> = match &cfg.kind {
            EmitterKind::Surface { triangles } => triangles.iter().map(triangle_area).collect(),
            EmitterKind::Curve { points } => points.windows(2).map(|w| w[0].distance(w[1])).collect(),
            _ => Vec::new(),
        };

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let (local, axis) = match &cfg.kind {
                EmitterKind::Omni => (Vec3::ZERO, None),
                EmitterKind::Directional => (Vec3::ZERO, Some(cfg.direction)),
                EmitterKind::Surface { triangles } => match sampler.pick_weighted(&weights) {
                    Some(i) => {
                        let [a, b, c] = triangles[i];
                        let normal = (b - a).cross(c - a);
                        (sampler.random_in_triangle(a, b, c), Some(normal))
                    }
                    None => break,
                },
                EmitterKind::Curve { points } => match sampler.pick_weighted(&weights) {
                    Some(i) => {
                        let t = sampler.random();
                        (points[i].lerp(points[i + 1], t), Some(cfg.direction))
                    }
                    None => break,
                },
                EmitterKind::Volume { shape } => {
                    let p = shape.sample(&mut sampler);
                    let outward = (p - shape.center()).try_normalize().unwrap_or(cfg.direction);
                    (p, Some(outward))
                }
            };

            let dir = match axis {
                Some(axis) => sampler.cone_direction(axis, half_angle),
                None => sampler.random_direction(),
            };
            let speed = cfg.speed + sampler.jitter(cfg.speed_random);
            let velocity = dir * speed + cfg.velocity * cfg.inherit_velocity;

            let age = if cfg.sub_step_offset {
                sampler.random() * step.dt
            } else {
                0.0
            };
            out.push(NewParticle {
                position: cfg.position + local + velocity * age,
                velocity,
                mass: cfg.mass,
                age,
            });
        }
        out
    }
}
