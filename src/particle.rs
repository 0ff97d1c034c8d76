//! Particle identity, lifespan and per-particle state.
//!
//! # Lifecycle
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Pending` | Emitted this step, integrated from the next step on |
//! | `Live` | Integrated every step |
//! | `Dead` | Removed when the step finishes |
//!
//! Ids come from a per-system counter that only moves forward, so an id is
//! never reused within a run even after its particle is removed.

use crate::sampling::Sampler;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Stable particle identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable)]
#[repr(transparent)]
pub struct ParticleId(pub u64);

impl std::fmt::Display for ParticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ParticleState {
    Pending = 0,
    Live = 1,
    Dead = 2,
}

impl ParticleState {
    /// Decode from the checkpoint representation.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ParticleState::Pending),
            1 => Some(ParticleState::Live),
            2 => Some(ParticleState::Dead),
            _ => None,
        }
    }
}

/// Lifespan value stored per particle. Infinite lifespans are `f32::INFINITY`.
pub type Lifespan = f32;

/// How new particles receive their lifespan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LifespanMode {
    /// Particles live forever.
    #[default]
    Infinite,
    /// Every particle lives `seconds`.
    Constant { seconds: f32 },
    /// `mean ± spread/2`, drawn from a stream seeded by the particle id.
    RandomRange { mean: f32, spread: f32, seed: u64 },
    /// Read from the `lifespanPP` float attribute each step.
    PerParticle,
}

/// Name of the attribute [`LifespanMode::PerParticle`] reads.
pub const LIFESPAN_PP: &str = "lifespanPP";

impl LifespanMode {
    /// Lifespan for a newly created particle.
    ///
    /// Per-particle mode starts at infinity; the attribute overrides it.
    pub fn initial(&self, id: ParticleId) -> Lifespan {
        match *self {
            LifespanMode::Infinite | LifespanMode::PerParticle => f32::INFINITY,
            LifespanMode::Constant { seconds } => seconds.max(0.0),
            LifespanMode::RandomRange { mean, spread, seed } => {
                let mut sampler = Sampler::derived(seed, id.0);
                (mean + sampler.jitter(spread)).max(0.0)
            }
        }
    }
}

/// Snapshot of one particle's built-in values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleRecord {
    pub id: ParticleId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub age: f32,
    pub lifespan: Lifespan,
    pub state: ParticleState,
    pub collisions: u32,
}

impl ParticleRecord {
    /// Whether the particle has outlived its lifespan.
    pub fn expired(&self) -> bool {
        self.age > self.lifespan
    }
}

/// Initial values for a particle about to be created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewParticle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    /// Age at creation (sub-step emission offset).
    pub age: f32,
}

impl NewParticle {
    /// Unit-mass particle at rest age zero.
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            mass: 1.0,
            age: 0.0,
        }
    }

    /// Override the mass.
    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }
}
