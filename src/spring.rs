//! Spring networks.
//!
//! A network is a set of damped springs between particles of one or two
//! systems, or between particles and fixed points. Force accumulation is a
//! pure sum over springs:
//!
//! ```text
//! f = stiffness * (length - rest_length) + damping * d(length)/dt
//! ```
//!
//! applied along the spring axis, scaled by `start_weight` at the start point
//! and `end_weight` at the end point. Fixed ends receive no force but still
//! pull on the particle they are attached to.
//!
//! # Example
//!
//! ```ignore
//! let mut net = SpringNetwork::new("cloth", SpringConfig::new(20.0).with_damping(0.5));
//! net.connect_all(system, &points)?;
//! let forces = net.accumulate_forces(&scene);
//! ```

use crate::error::{DynamicsError, Result};
use crate::integrator::Kinematic;
use crate::particle::ParticleId;
use crate::scene::SystemId;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Per-particle spring forces keyed by owning system and particle id.
pub type SpringForces = HashMap<(SystemId, ParticleId), Vec3>;

/// Lookup of particle positions and velocities by id.
pub trait PointSource {
    fn point(&self, system: SystemId, id: ParticleId) -> Option<Kinematic>;
}

/// One end of a spring.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpringEnd {
    /// A particle of a system. Receives force.
    Particle { system: SystemId, id: ParticleId },
    /// A fixed point in space. Receives no force.
    Fixed(Vec3),
}

impl SpringEnd {
    fn key(&self) -> EndKey {
        match *self {
            SpringEnd::Particle { system, id } => EndKey::Particle(system, id),
            SpringEnd::Fixed(p) => EndKey::Fixed(p.to_array().map(f32::to_bits)),
        }
    }

    fn system(&self) -> Option<SystemId> {
        match *self {
            SpringEnd::Particle { system, .. } => Some(system),
            SpringEnd::Fixed(_) => None,
        }
    }

    fn resolve(&self, source: &dyn PointSource) -> Option<Kinematic> {
        match *self {
            SpringEnd::Particle { system, id } => source.point(system, id),
            SpringEnd::Fixed(p) => Some(Kinematic::new(p, Vec3::ZERO)),
        }
    }
}

impl std::fmt::Display for SpringEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpringEnd::Particle { system, id } => write!(f, "{}{}", system, id),
            SpringEnd::Fixed(p) => write!(f, "fixed({}, {}, {})", p.x, p.y, p.z),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum EndKey {
    Particle(SystemId, ParticleId),
    Fixed([u32; 3]),
}

fn pair_key(a: EndKey, b: EndKey) -> (EndKey, EndKey) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A single spring.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spring {
    pub start: SpringEnd,
    pub end: SpringEnd,
    pub rest_length: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub start_weight: f32,
    pub end_weight: f32,
}

/// Network parameters applied to springs created through it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpringConfig {
    pub stiffness: f32,
    #[serde(default)]
    pub damping: f32,
    /// Rest length used when `use_rest_length_ps` is off.
    #[serde(default)]
    pub rest_length: f32,
    /// Each spring rests at the distance between its ends at creation.
    #[serde(default = "default_true")]
    pub use_rest_length_ps: bool,
    #[serde(default = "default_weight")]
    pub start_weight: f32,
    #[serde(default = "default_weight")]
    pub end_weight: f32,
    /// `connect_all` only links points at least this far apart.
    #[serde(default)]
    pub min_distance: f32,
    /// `connect_all` only links points at most this far apart. Negative is unlimited.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// At most one spring per unordered pair of ends.
    #[serde(default = "default_true")]
    pub no_duplicate: bool,
    /// Only springs between different systems.
    #[serde(default)]
    pub exclusive: bool,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f32 {
    1.0
}

fn default_max_distance() -> f32 {
    -1.0
}

impl SpringConfig {
    pub fn new(stiffness: f32) -> Self {
        Self {
            stiffness,
            damping: 0.0,
            rest_length: 0.0,
            use_rest_length_ps: true,
            start_weight: 1.0,
            end_weight: 1.0,
            min_distance: 0.0,
            max_distance: -1.0,
            no_duplicate: true,
            exclusive: false,
        }
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    /// Use one rest length for every spring.
    pub fn with_rest_length(mut self, rest_length: f32) -> Self {
        self.rest_length = rest_length.max(0.0);
        self.use_rest_length_ps = false;
        self
    }

    pub fn with_weights(mut self, start: f32, end: f32) -> Self {
        self.start_weight = start;
        self.end_weight = end;
        self
    }

    pub fn with_distance_range(mut self, min: f32, max: f32) -> Self {
        self.min_distance = min;
        self.max_distance = max;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn allow_duplicates(mut self) -> Self {
        self.no_duplicate = false;
        self
    }

    fn in_range(&self, distance: f32) -> bool {
        distance >= self.min_distance && (self.max_distance < 0.0 || distance <= self.max_distance)
    }
}

/// A named set of springs.
#[derive(Clone, Debug)]
pub struct SpringNetwork {
    name: String,
    config: SpringConfig,
    springs: Vec<Spring>,
    pairs: HashSet<(EndKey, EndKey)>,
}

impl SpringNetwork {
    pub fn new(name: impl Into<String>, config: SpringConfig) -> Self {
        Self {
            name: name.into(),
            config,
            springs: Vec::new(),
            pairs: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SpringConfig {
        &self.config
    }

    /// Replace the parameters. Existing springs take the new stiffness,
    /// damping and weights; their rest lengths are kept.
    pub fn set_config(&mut self, config: SpringConfig) {
        for s in &mut self.springs {
            s.stiffness = config.stiffness;
            s.damping = config.damping;
            s.start_weight = config.start_weight;
            s.end_weight = config.end_weight;
            if !config.use_rest_length_ps {
                s.rest_length = config.rest_length;
            }
        }
        self.config = config;
    }

    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    pub fn len(&self) -> usize {
        self.springs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.springs.is_empty()
    }

    /// Add one spring between two ends at the given positions.
    ///
    /// Returns `Ok(false)` when the spring is skipped because the network is
    /// exclusive and both ends are in the same system. Fails with
    /// [`DynamicsError::DuplicateSpring`] when `no_duplicate` is set and the
    /// pair is already linked.
    pub fn add_spring(
        &mut self,
        start: SpringEnd,
        end: SpringEnd,
        start_pos: Vec3,
        end_pos: Vec3,
        rest_length: Option<f32>,
    ) -> Result<bool> {
        if self.config.exclusive && start.system().is_some() && start.system() == end.system() {
            return Ok(false);
        }
        let key = pair_key(start.key(), end.key());
        if self.config.no_duplicate && self.pairs.contains(&key) {
            return Err(DynamicsError::DuplicateSpring(start.to_string(), end.to_string()));
        }
        let rest_length = rest_length.unwrap_or(if self.config.use_rest_length_ps {
            start_pos.distance(end_pos)
        } else {
            self.config.rest_length
        });
        self.pairs.insert(key);
        self.springs.push(Spring {
            start,
            end,
            rest_length,
            stiffness: self.config.stiffness,
            damping: self.config.damping,
            start_weight: self.config.start_weight,
            end_weight: self.config.end_weight,
        });
        Ok(true)
    }

    /// Same as [`add_spring`](Self::add_spring) but duplicates are skipped.
    fn add_if_new(&mut self, start: SpringEnd, end: SpringEnd, a: Vec3, b: Vec3) -> Result<bool> {
        match self.add_spring(start, end, a, b, None) {
            Err(DynamicsError::DuplicateSpring(..)) => Ok(false),
            other => other,
        }
    }

    /// Link every pair of points of one system whose distance lies in the
    /// configured range. Returns the number of springs added.
    pub fn connect_all(&mut self, system: SystemId, points: &[(ParticleId, Vec3)]) -> Result<usize> {
        let mut added = 0;
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                let (ia, pa) = points[i];
                let (ib, pb) = points[j];
                if !self.config.in_range(pa.distance(pb)) {
                    continue;
                }
                let a = SpringEnd::Particle { system, id: ia };
                let b = SpringEnd::Particle { system, id: ib };
                if self.add_if_new(a, b, pa, pb)? {
                    added += 1;
                }
            }
        }
        log::debug!("network '{}': connect_all added {} springs", self.name, added);
        Ok(added)
    }

    /// Link every point of one system to every point of another within range.
    pub fn connect_between(
        &mut self,
        first: (SystemId, &[(ParticleId, Vec3)]),
        second: (SystemId, &[(ParticleId, Vec3)]),
    ) -> Result<usize> {
        let mut added = 0;
        for &(ia, pa) in first.1 {
            for &(ib, pb) in second.1 {
                if !self.config.in_range(pa.distance(pb)) {
                    continue;
                }
                let a = SpringEnd::Particle { system: first.0, id: ia };
                let b = SpringEnd::Particle { system: second.0, id: ib };
                if a != b && self.add_if_new(a, b, pa, pb)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Link consecutive points (in the given order) into a chain.
    pub fn connect_chain(&mut self, system: SystemId, points: &[(ParticleId, Vec3)]) -> Result<usize> {
        let mut added = 0;
        for w in points.windows(2) {
            let a = SpringEnd::Particle { system, id: w[0].0 };
            let b = SpringEnd::Particle { system, id: w[1].0 };
            if self.add_if_new(a, b, w[0].1, w[1].1)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Sum spring forces into `forces`. Springs with a missing end are skipped.
    pub fn accumulate_into(&self, source: &dyn PointSource, forces: &mut SpringForces) {
        for spring in &self.springs {
            let (Some(a), Some(b)) = (spring.start.resolve(source), spring.end.resolve(source)) else {
                continue;
            };
            let axis = b.position - a.position;
            let length = axis.length();
            if length < 1e-9 {
                continue;
            }
            let dir = axis / length;
            let rate = (b.velocity - a.velocity).dot(dir);
            let magnitude = spring.stiffness * (length - spring.rest_length) + spring.damping * rate;
            if let SpringEnd::Particle { system, id } = spring.start {
                *forces.entry((system, id)).or_insert(Vec3::ZERO) += dir * magnitude * spring.start_weight;
            }
            if let SpringEnd::Particle { system, id } = spring.end {
                *forces.entry((system, id)).or_insert(Vec3::ZERO) -= dir * magnitude * spring.end_weight;
            }
        }
    }

    /// Spring forces for every dynamic end.
    pub fn accumulate_forces(&self, source: &dyn PointSource) -> SpringForces {
        let mut forces = SpringForces::new();
        self.accumulate_into(source, &mut forces);
        forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Points(HashMap<(SystemId, ParticleId), Kinematic>);

    impl PointSource for Points {
        fn point(&self, system: SystemId, id: ParticleId) -> Option<Kinematic> {
            self.0.get(&(system, id)).copied()
        }
    }

    const SYS: SystemId = SystemId(0);

    fn points(list: &[(u64, Vec3)]) -> Points {
        Points(
            list.iter()
                .map(|(id, p)| ((SYS, ParticleId(*id)), Kinematic::new(*p, Vec3::ZERO)))
                .collect(),
        )
    }

    #[test]
    fn test_restoring_force_magnitude() {
        let source = points(&[(0, Vec3::ZERO), (1, Vec3::new(10.0, 0.0, 0.0))]);
        let mut net = SpringNetwork::new("n", SpringConfig::new(1.0).with_rest_length(5.0));
        let a = SpringEnd::Particle { system: SYS, id: ParticleId(0) };
        let b = SpringEnd::Particle { system: SYS, id: ParticleId(1) };
        net.add_spring(a, b, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), None).unwrap();

        let forces = net.accumulate_forces(&source);
        let fa = forces[&(SYS, ParticleId(0))];
        let fb = forces[&(SYS, ParticleId(1))];
        assert!((fa - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
        assert!((fb - Vec3::new(-5.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_fixed_end_pulls_without_receiving() {
        let source = points(&[(0, Vec3::new(0.0, -2.0, 0.0))]);
        let mut net = SpringNetwork::new("n", SpringConfig::new(3.0).with_rest_length(1.0));
        let anchor = SpringEnd::Fixed(Vec3::ZERO);
        let bob = SpringEnd::Particle { system: SYS, id: ParticleId(0) };
        net.add_spring(anchor, bob, Vec3::ZERO, Vec3::new(0.0, -2.0, 0.0), None).unwrap();
        let forces = net.accumulate_forces(&source);
        assert_eq!(forces.len(), 1);
        assert!((forces[&(SYS, ParticleId(0))] - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_no_duplicate_rejects_reversed_pair() {
        let mut net = SpringNetwork::new("n", SpringConfig::new(1.0));
        let a = SpringEnd::Particle { system: SYS, id: ParticleId(0) };
        let b = SpringEnd::Particle { system: SYS, id: ParticleId(1) };
        net.add_spring(a, b, Vec3::ZERO, Vec3::X, None).unwrap();
        let err = net.add_spring(b, a, Vec3::X, Vec3::ZERO, None);
        assert!(matches!(err, Err(DynamicsError::DuplicateSpring(..))));
        assert_eq!(net.len(), 1);
    }

    #[test]
    fn test_connect_all_respects_range_and_duplicates() {
        let pts = [
            (ParticleId(0), Vec3::ZERO),
            (ParticleId(1), Vec3::new(1.0, 0.0, 0.0)),
            (ParticleId(2), Vec3::new(5.0, 0.0, 0.0)),
        ];
        let mut net = SpringNetwork::new("n", SpringConfig::new(1.0).with_distance_range(0.0, 2.0));
        assert_eq!(net.connect_all(SYS, &pts).unwrap(), 1);
        assert_eq!(net.connect_all(SYS, &pts).unwrap(), 0);
        assert_eq!(net.springs()[0].rest_length, 1.0);
    }

    #[test]
    fn test_exclusive_skips_same_system() {
        let pts = [(ParticleId(0), Vec3::ZERO), (ParticleId(1), Vec3::X)];
        let mut net = SpringNetwork::new("n", SpringConfig::new(1.0).exclusive());
        assert_eq!(net.connect_all(SYS, &pts).unwrap(), 0);
        let other = [(ParticleId(0), Vec3::Y)];
        assert_eq!(net.connect_between((SYS, &pts), (SystemId(1), &other)).unwrap(), 2);
    }

    #[test]
    fn test_damping_opposes_separation() {
        let mut source = points(&[(0, Vec3::ZERO), (1, Vec3::X)]);
        source.0.insert((SYS, ParticleId(1)), Kinematic::new(Vec3::X, Vec3::new(2.0, 0.0, 0.0)));
        let mut net = SpringNetwork::new("n", SpringConfig::new(0.0).with_damping(0.5));
        net.connect_chain(SYS, &[(ParticleId(0), Vec3::ZERO), (ParticleId(1), Vec3::X)]).unwrap();
        let forces = net.accumulate_forces(&source);
        // Separating at 2 units/s: end is pulled back by 1.
        assert!((forces[&(SYS, ParticleId(1))] - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_missing_end_is_skipped_but_kept() {
        let source = points(&[(0, Vec3::ZERO)]);
        let mut net = SpringNetwork::new("n", SpringConfig::new(1.0));
        net.connect_chain(SYS, &[(ParticleId(0), Vec3::ZERO), (ParticleId(9), Vec3::X)]).unwrap();
        assert!(net.accumulate_forces(&source).is_empty());
        assert_eq!(net.len(), 1);

        // The end comes back (a restored frame): the spring acts again.
        let restored = points(&[(0, Vec3::ZERO), (9, Vec3::new(3.0, 0.0, 0.0))]);
        assert_eq!(net.accumulate_forces(&restored).len(), 2);
    }
}
