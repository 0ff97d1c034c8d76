//! Force fields.
//!
//! A field is a pure function from a sample (position, velocity, mass, time)
//! to a force. Fields never mutate during a step; parameter changes happen
//! between steps through [`Scene::edit_field`](crate::Scene::edit_field).
//!
//! # Field Types
//!
//! | Kind | Force |
//! |------|-------|
//! | [`FieldKind::Air`] | Pushes velocity toward a wind velocity |
//! | [`FieldKind::Gravity`] | Constant acceleration along a direction |
//! | [`FieldKind::Newton`] | Inverse-square attraction toward the field position |
//! | [`FieldKind::Radial`] | Push away from (or pull toward) the field position |
//! | [`FieldKind::Vortex`] | Swirl around an axis through the field position |
//! | [`FieldKind::Turbulence`] | Deterministic noise, advancing with time |
//! | [`FieldKind::Uniform`] | Constant force along a direction |
//! | [`FieldKind::Drag`] | Opposes velocity |
//! | [`FieldKind::VolumeAxis`] | Composite motion relative to a volume shape |
//!
//! # Distance Attenuation
//!
//! When `max_distance > 0` the magnitude is scaled by
//! `(1 - distance / max_distance) ^ attenuation` and is zero beyond
//! `max_distance`. `max_distance = -1` (or `use_max_distance = false`) means
//! unlimited range, in which case no distance curve is applied.
//!
//! # Example
//!
//! ```ignore
//! let gravity = FieldConfig::gravity(9.8);
//! let swirl = FieldConfig::vortex(Vec3::Y, 2.0)
//!     .with_position(Vec3::new(0.0, -1.0, 0.0))
//!     .with_max_distance(5.0)
//!     .with_attenuation(1.0);
//! ```

use crate::noise;
use crate::volume::VolumeShape;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel for "no distance limit".
pub const UNLIMITED_DISTANCE: f32 = -1.0;

/// Minimum length for a direction or axis to be usable.
const MIN_DIRECTION: f32 = 1e-6;

/// Field-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Wind. Drives sample velocity toward `direction * magnitude`.
    Air {
        /// Wind direction.
        direction: Vec3,
        /// How quickly samples are brought up to wind speed.
        speed: f32,
        /// Fraction of the field's own velocity added to the wind.
        inherit_velocity: f32,
        /// Optional cone half-angle as a fraction of PI. Samples outside the
        /// cone around `direction` receive no force.
        spread: Option<f32>,
    },

    /// Uniform acceleration along `direction`, proportional to sample mass.
    Gravity {
        /// Direction of pull.
        direction: Vec3,
    },

    /// Inverse-square attraction to the field position.
    Newton {
        /// Mass of the attracting source.
        source_mass: f32,
        /// Distances below this are clamped to avoid singularities.
        min_distance: f32,
    },

    /// Radial push away from the field position (negative magnitude pulls).
    Radial {
        /// 0 = follow the attenuation curve, 1 = abrupt cutoff at max distance.
        falloff_type: f32,
    },

    /// Rotation around an axis through the field position.
    Vortex {
        /// Rotation axis.
        axis: Vec3,
    },

    /// Noise-driven force.
    Turbulence {
        /// Spatial frequency of the noise.
        frequency: f32,
        /// Phase offset of the noise field.
        phase: Vec3,
        /// Additional octaves beyond the base one.
        noise_level: u32,
        /// Weight ratio between successive octaves.
        noise_ratio: f32,
        /// Rate at which the phase advances with simulation time.
        speed: f32,
    },

    /// Constant force along `direction`.
    Uniform {
        /// Direction of push.
        direction: Vec3,
    },

    /// Velocity-opposing force. With a direction only that component is damped.
    Drag {
        /// Optional damping direction.
        direction: Option<Vec3>,
    },

    /// Motion defined relative to a volume shape's centre and axis.
    VolumeAxis {
        /// Shape that defines the frame and extent of the field.
        shape: VolumeShape,
        /// Push away from the shape centre.
        away_from_center: f32,
        /// Push away from the shape axis.
        away_from_axis: f32,
        /// Push along the shape axis.
        along_axis: f32,
        /// Swirl around the shape axis.
        around_axis: f32,
        /// Constant push along `direction`.
        directional_speed: f32,
        /// Direction for `directional_speed`.
        direction: Vec3,
        /// Noise amplitude.
        turbulence: f32,
        /// Rate at which the noise evolves.
        turbulence_speed: f32,
        /// Spatial frequency of the noise.
        turbulence_frequency: f32,
    },
}

impl FieldKind {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Air { .. } => "air",
            FieldKind::Gravity { .. } => "gravity",
            FieldKind::Newton { .. } => "newton",
            FieldKind::Radial { .. } => "radial",
            FieldKind::Vortex { .. } => "vortex",
            FieldKind::Turbulence { .. } => "turbulence",
            FieldKind::Uniform { .. } => "uniform",
            FieldKind::Drag { .. } => "drag",
            FieldKind::VolumeAxis { .. } => "volume_axis",
        }
    }

    /// Whether the field carries time-driven noise state.
    pub fn is_time_varying(&self) -> bool {
        matches!(self, FieldKind::Turbulence { .. } | FieldKind::VolumeAxis { .. })
    }
}

/// How a field is applied to a group of points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// Evaluate once per point.
    #[default]
    PerVertex,
    /// Evaluate once at the centroid and apply the result to every point.
    Centroid,
}

/// Field parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Field-specific parameters.
    pub kind: FieldKind,
    /// World-space position of the field.
    #[serde(default)]
    pub position: Vec3,
    /// Velocity of the field itself (used by air inheritance).
    #[serde(default)]
    pub velocity: Vec3,
    /// Strength.
    pub magnitude: f32,
    /// Exponent of the distance curve.
    #[serde(default)]
    pub attenuation: f32,
    /// Range limit, `-1` for unlimited.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// When false the range is unlimited regardless of `max_distance`.
    #[serde(default = "default_true")]
    pub use_max_distance: bool,
    /// Optional region outside which the field has no effect.
    #[serde(default)]
    pub volume: Option<VolumeShape>,
    /// Per-point or centroid application.
    #[serde(default)]
    pub mode: EvalMode,
}

fn default_max_distance() -> f32 {
    UNLIMITED_DISTANCE
}

fn default_true() -> bool {
    true
}

impl FieldConfig {
    /// Create a field of the given kind and magnitude with unlimited range.
    pub fn new(kind: FieldKind, magnitude: f32) -> Self {
        Self {
            kind,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            magnitude,
            attenuation: 0.0,
            max_distance: UNLIMITED_DISTANCE,
            use_max_distance: true,
            volume: None,
            mode: EvalMode::PerVertex,
        }
    }

    // =========================================================================
    // PRESETS
    // =========================================================================

    /// Downward gravity (-Y).
    pub fn gravity(magnitude: f32) -> Self {
        Self::new(FieldKind::Gravity { direction: Vec3::NEG_Y }, magnitude)
    }

    /// Wind along `direction`.
    pub fn air(direction: Vec3, magnitude: f32) -> Self {
        Self::new(
            FieldKind::Air {
                direction,
                speed: 1.0,
                inherit_velocity: 0.0,
                spread: None,
            },
            magnitude,
        )
    }

    /// Point attractor.
    pub fn newton(magnitude: f32) -> Self {
        Self::new(
            FieldKind::Newton {
                source_mass: 1.0,
                min_distance: 0.2,
            },
            magnitude,
        )
    }

    /// Radial push.
    pub fn radial(magnitude: f32) -> Self {
        Self::new(FieldKind::Radial { falloff_type: 0.0 }, magnitude)
    }

    /// Swirl around `axis`.
    pub fn vortex(axis: Vec3, magnitude: f32) -> Self {
        Self::new(FieldKind::Vortex { axis }, magnitude)
    }

    /// Noise force.
    pub fn turbulence(magnitude: f32, frequency: f32) -> Self {
        Self::new(
            FieldKind::Turbulence {
                frequency,
                phase: Vec3::ZERO,
                noise_level: 0,
                noise_ratio: 0.707,
                speed: 0.0,
            },
            magnitude,
        )
    }

    /// Constant push along `direction`.
    pub fn uniform(direction: Vec3, magnitude: f32) -> Self {
        Self::new(FieldKind::Uniform { direction }, magnitude)
    }

    /// Isotropic drag.
    pub fn drag(magnitude: f32) -> Self {
        Self::new(FieldKind::Drag { direction: None }, magnitude)
    }

    /// Volume-axis field with only `away_from_center` set.
    pub fn volume_axis(shape: VolumeShape, magnitude: f32) -> Self {
        Self::new(
            FieldKind::VolumeAxis {
                shape,
                away_from_center: 1.0,
                away_from_axis: 0.0,
                along_axis: 0.0,
                around_axis: 0.0,
                directional_speed: 0.0,
                direction: Vec3::X,
                turbulence: 0.0,
                turbulence_speed: 0.0,
                turbulence_frequency: 1.0,
            },
            magnitude,
        )
    }

    // =========================================================================
    // BUILDER METHODS
    // =========================================================================

    /// Set the field position.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Set the field's own velocity.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Limit the range. Negative values mean unlimited.
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Set the attenuation exponent.
    pub fn with_attenuation(mut self, attenuation: f32) -> Self {
        self.attenuation = attenuation.max(0.0);
        self
    }

    /// Restrict the field to a volume.
    pub fn with_volume(mut self, volume: VolumeShape) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Evaluate once at the centroid instead of per point.
    pub fn centroid(mut self) -> Self {
        self.mode = EvalMode::Centroid;
        self
    }

    /// Whether a range limit is active.
    pub fn is_bounded(&self) -> bool {
        self.use_max_distance && self.max_distance > 0.0
    }

    /// Reason this field cannot produce a force, if any.
    pub fn degeneracy(&self) -> Option<&'static str> {
        if !self.magnitude.is_finite() || !self.position.is_finite() {
            return Some("non-finite magnitude or position");
        }
        if let Some(volume) = &self.volume {
            if volume.is_degenerate() {
                return Some("zero-volume restriction shape");
            }
        }
        match self.kind {
            FieldKind::Gravity { direction } | FieldKind::Uniform { direction } => {
                (direction.length() < MIN_DIRECTION).then_some("zero direction")
            }
            FieldKind::Air { direction, .. } => {
                (direction.length() < MIN_DIRECTION).then_some("zero wind direction")
            }
            FieldKind::Vortex { axis } => (axis.length() < MIN_DIRECTION).then_some("degenerate axis"),
            FieldKind::Drag { direction: Some(d) } => {
                (d.length() < MIN_DIRECTION).then_some("zero drag direction")
            }
            FieldKind::Newton { min_distance, .. } => {
                (!min_distance.is_finite() || min_distance < 0.0).then_some("negative min distance")
            }
            FieldKind::VolumeAxis { shape, .. } => shape.is_degenerate().then_some("zero-volume shape"),
            _ => None,
        }
    }
}

/// A field instance: parameters plus a one-shot diagnostic latch.
#[derive(Debug)]
pub struct Field {
    name: String,
    config: FieldConfig,
    warned: AtomicBool,
}

impl Clone for Field {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            warned: AtomicBool::new(self.warned.load(Ordering::Relaxed)),
        }
    }
}

impl Field {
    /// Create a named field.
    pub fn new(name: impl Into<String>, config: FieldConfig) -> Self {
        Self {
            name: name.into(),
            config,
            warned: AtomicBool::new(false),
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current parameters.
    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Replace the parameters. Re-arms the degenerate-geometry diagnostic.
    pub fn set_config(&mut self, config: FieldConfig) {
        self.config = config;
        self.warned.store(false, Ordering::Relaxed);
    }

    fn warn_once(&self, reason: &str) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "{} field '{}' evaluates to zero: {}",
                self.config.kind.name(),
                self.name,
                reason
            );
        }
    }

    /// Distance curve factor for a sample at `distance` from the field.
    fn distance_factor(&self, distance: f32) -> f32 {
        let cfg = &self.config;
        if !cfg.is_bounded() {
            return 1.0;
        }
        if distance > cfg.max_distance {
            return 0.0;
        }
        let t = (1.0 - distance / cfg.max_distance).max(0.0);
        if cfg.attenuation == 0.0 {
            1.0
        } else {
            t.powf(cfg.attenuation)
        }
    }

    /// Force on a single sample.
    ///
    /// Degenerate configurations return zero and log once.
    pub fn evaluate(&self, point: Vec3, velocity: Vec3, mass: f32, time: f32) -> Vec3 {
        let cfg = &self.config;
        if let Some(reason) = cfg.degeneracy() {
            self.warn_once(reason);
            return Vec3::ZERO;
        }
        if let Some(volume) = &cfg.volume {
            if !volume.contains(point) {
                return Vec3::ZERO;
            }
        }

        let offset = point - cfg.position;
        let distance = offset.length();
        let factor = match cfg.kind {
            FieldKind::Radial { .. } => 1.0,
            _ => self.distance_factor(distance),
        };
        if factor == 0.0 {
            return Vec3::ZERO;
        }
        let magnitude = cfg.magnitude * factor;

        match cfg.kind {
            FieldKind::Air {
                direction,
                speed,
                inherit_velocity,
                spread,
            } => {
                let dir = direction.normalize();
                if let Some(spread) = spread {
                    let half_angle = spread.clamp(0.0, 1.0) * std::f32::consts::PI;
                    if distance > MIN_DIRECTION && offset.dot(dir) / distance < half_angle.cos() {
                        return Vec3::ZERO;
                    }
                }
                let wind = dir * magnitude + cfg.velocity * inherit_velocity;
                (wind - velocity) * speed * mass
            }

            FieldKind::Gravity { direction } => direction.normalize() * magnitude * mass,

            FieldKind::Newton {
                source_mass,
                min_distance,
            } => {
                if distance < MIN_DIRECTION {
                    return Vec3::ZERO;
                }
                let d2 = (distance * distance).max(min_distance * min_distance);
                let toward = -offset / distance;
                toward * (magnitude * source_mass * mass / d2)
            }

            FieldKind::Radial { falloff_type } => {
                if distance < MIN_DIRECTION {
                    return Vec3::ZERO;
                }
                let radial_factor = if cfg.is_bounded() {
                    if distance > cfg.max_distance {
                        return Vec3::ZERO;
                    }
                    let curve = self.distance_factor(distance);
                    let blend = falloff_type.clamp(0.0, 1.0);
                    curve + (1.0 - curve) * blend
                } else {
                    1.0
                };
                offset / distance * cfg.magnitude * radial_factor
            }

            FieldKind::Vortex { axis } => {
                let axis = axis.normalize();
                let radial = offset - axis * offset.dot(axis);
                let r = radial.length();
                if r < MIN_DIRECTION {
                    return Vec3::ZERO;
                }
                axis.cross(radial) / r * magnitude
            }

            FieldKind::Turbulence {
                frequency,
                phase,
                noise_level,
                noise_ratio,
                speed,
            } => {
                let phase = phase + Vec3::splat(time * speed);
                noise::octave_noise(point * frequency + phase, noise_level, noise_ratio) * magnitude
            }

            FieldKind::Uniform { direction } => direction.normalize() * magnitude,

            FieldKind::Drag { direction } => match direction {
                Some(d) => {
                    let d = d.normalize();
                    -d * velocity.dot(d) * magnitude
                }
                None => -velocity * magnitude,
            },

            FieldKind::VolumeAxis {
                shape,
                away_from_center,
                away_from_axis,
                along_axis,
                around_axis,
                directional_speed,
                direction,
                turbulence,
                turbulence_speed,
                turbulence_frequency,
            } => {
                if !shape.contains(point) {
                    return Vec3::ZERO;
                }
                let center = shape.center();
                let axis_point = shape.axis_point(point);
                let from_center = (point - center).normalize_or_zero();
                let from_axis = point - axis_point;
                let from_axis_dir = from_axis.normalize_or_zero();
                let around = Vec3::Y.cross(from_axis).normalize_or_zero();

                let mut motion = from_center * away_from_center
                    + from_axis_dir * away_from_axis
                    + Vec3::Y * along_axis
                    + around * around_axis
                    + direction.normalize_or_zero() * directional_speed;
                if turbulence != 0.0 {
                    let phase = Vec3::splat(time * turbulence_speed);
                    motion += noise::vector_noise(point * turbulence_frequency + phase) * turbulence;
                }
                motion * magnitude
            }
        }
    }

    /// Forces on a group of points.
    ///
    /// In [`EvalMode::Centroid`] the field is evaluated once at the mean
    /// position, velocity and mass and the result is broadcast. Both modes
    /// share [`Field::evaluate`] so the per-point formula is identical.
    pub fn evaluate_points(
        &self,
        points: &[Vec3],
        velocities: &[Vec3],
        masses: &[f32],
        time: f32,
    ) -> Vec<Vec3> {
        let n = points.len().min(velocities.len()).min(masses.len());
        if n == 0 {
            return Vec::new();
        }
        match self.config.mode {
            EvalMode::PerVertex => (0..n)
                .map(|i| self.evaluate(points[i], velocities[i], masses[i], time))
                .collect(),
            EvalMode::Centroid => {
                let inv = 1.0 / n as f32;
                let centroid = points[..n].iter().copied().sum::<Vec3>() * inv;
                let velocity = velocities[..n].iter().copied().sum::<Vec3>() * inv;
                let mass = masses[..n].iter().sum::<f32>() * inv;
                vec![self.evaluate(centroid, velocity, mass, time); n]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_gravity_scales_with_mass() {
        let f = Field::new("g", FieldConfig::gravity(9.8));
        assert!(close(f.evaluate(Vec3::ZERO, Vec3::ZERO, 2.0, 0.0), Vec3::new(0.0, -19.6, 0.0)));
    }

    #[test]
    fn test_unlimited_range_ignores_max_distance() {
        let mut cfg = FieldConfig::uniform(Vec3::X, 3.0).with_attenuation(2.0);
        cfg.use_max_distance = false;
        let p = Vec3::new(50.0, 0.0, 0.0);
        let a = Field::new("u", cfg.clone().with_max_distance(1.0)).evaluate(p, Vec3::ZERO, 1.0, 0.0);
        let b = Field::new("u", cfg.with_max_distance(1000.0)).evaluate(p, Vec3::ZERO, 1.0, 0.0);
        assert_eq!(a, b);

        let unlimited = FieldConfig::uniform(Vec3::X, 3.0).with_max_distance(UNLIMITED_DISTANCE);
        assert_eq!(Field::new("u", unlimited).evaluate(p, Vec3::ZERO, 1.0, 0.0), a);
    }

    #[test]
    fn test_attenuation_curve() {
        let cfg = FieldConfig::uniform(Vec3::X, 4.0)
            .with_max_distance(10.0)
            .with_attenuation(2.0);
        let f = Field::new("u", cfg);
        // (1 - 5/10)^2 = 0.25
        assert!(close(f.evaluate(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::X));
        assert_eq!(f.evaluate(Vec3::new(11.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_newton_clamps_min_distance() {
        let f = Field::new("n", FieldConfig::newton(1.0));
        let near = f.evaluate(Vec3::new(0.01, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0);
        // clamped to 0.2^2
        assert!(close(near, Vec3::new(-25.0, 0.0, 0.0)));
        let far = f.evaluate(Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0);
        assert!(close(far, Vec3::new(-0.25, 0.0, 0.0)));
    }

    #[test]
    fn test_radial_abrupt_falloff() {
        let mut cfg = FieldConfig::radial(2.0).with_max_distance(4.0).with_attenuation(1.0);
        cfg.kind = FieldKind::Radial { falloff_type: 1.0 };
        let f = Field::new("r", cfg);
        assert!(close(f.evaluate(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(f.evaluate(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_vortex_is_tangential() {
        let f = Field::new("v", FieldConfig::vortex(Vec3::Y, 1.0));
        let p = Vec3::new(1.0, 0.5, 0.0);
        let force = f.evaluate(p, Vec3::ZERO, 1.0, 0.0);
        assert!(force.dot(Vec3::new(1.0, 0.0, 0.0)).abs() < 1e-5);
        assert!(close(force, Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn test_degenerate_vortex_is_zero() {
        let f = Field::new("v", FieldConfig::vortex(Vec3::ZERO, 1.0));
        assert_eq!(f.evaluate(Vec3::ONE, Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
        assert!(f.warned.load(Ordering::Relaxed));
    }

    #[test]
    fn test_drag_opposes_velocity() {
        let f = Field::new("d", FieldConfig::drag(0.5));
        assert!(close(f.evaluate(Vec3::ZERO, Vec3::new(2.0, 0.0, -4.0), 1.0, 0.0), Vec3::new(-1.0, 0.0, 2.0)));
    }

    #[test]
    fn test_turbulence_phase_advances() {
        let mut cfg = FieldConfig::turbulence(1.0, 1.3);
        if let FieldKind::Turbulence { speed, .. } = &mut cfg.kind {
            *speed = 0.5;
        }
        let f = Field::new("t", cfg);
        let p = Vec3::new(0.31, 0.77, 0.12);
        let a = f.evaluate(p, Vec3::ZERO, 1.0, 0.0);
        assert_eq!(a, f.evaluate(p, Vec3::ZERO, 1.0, 0.0));
        assert_ne!(a, f.evaluate(p, Vec3::ZERO, 1.0, 1.0));
    }

    #[test]
    fn test_volume_restriction() {
        let cfg = FieldConfig::uniform(Vec3::Y, 1.0).with_volume(VolumeShape::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        });
        let f = Field::new("u", cfg);
        assert_eq!(f.evaluate(Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
        assert!(close(f.evaluate(Vec3::ZERO, Vec3::ZERO, 1.0, 0.0), Vec3::Y));
    }

    #[test]
    fn test_volume_axis_away_from_center() {
        let shape = VolumeShape::Sphere {
            center: Vec3::ZERO,
            radius: 2.0,
        };
        let f = Field::new("va", FieldConfig::volume_axis(shape, 3.0));
        assert!(close(f.evaluate(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(f.evaluate(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_centroid_and_per_vertex_share_formula() {
        let points = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0)];
        let vels = [Vec3::ZERO; 2];
        let masses = [1.0; 2];
        let cfg = FieldConfig::radial(1.0).with_max_distance(4.0).with_attenuation(1.0);

        let per_vertex = Field::new("r", cfg.clone()).evaluate_points(&points, &vels, &masses, 0.0);
        assert!(close(per_vertex[0], Vec3::new(0.75, 0.0, 0.0)));
        assert!(close(per_vertex[1], Vec3::new(0.25, 0.0, 0.0)));

        let centroid = Field::new("r", cfg.centroid()).evaluate_points(&points, &vels, &masses, 0.0);
        assert!(close(centroid[0], Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(centroid[0], centroid[1]);
    }

    #[test]
    fn test_air_spread_cone() {
        let mut cfg = FieldConfig::air(Vec3::X, 2.0);
        if let FieldKind::Air { spread, .. } = &mut cfg.kind {
            *spread = Some(0.25);
        }
        let f = Field::new("a", cfg);
        assert!(close(f.evaluate(Vec3::new(1.0, 0.1, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(f.evaluate(Vec3::new(-1.0, 0.0, 0.0), Vec3::ZERO, 1.0, 0.0), Vec3::ZERO);
    }
}
