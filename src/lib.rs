//! # dynfx - Deterministic Particle Dynamics
//!
//! A time-stepped evaluator for particles, force fields, collisions, springs
//! and rigid bodies, with a per-frame cache and checkpoint files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dynfx::prelude::*;
//!
//! fn main() -> dynfx::Result<()> {
//!     let mut scene = Scene::new(DynGlobals::new(24.0))?;
//!
//!     let water = scene.create_system("water", SystemConfig::new()
//!         .with_lifespan(LifespanMode::Constant { seconds: 3.0 }))?;
//!     let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8))?;
//!     let fountain = scene.create_emitter("fountain", EmitterConfig::directional(Vec3::Y, 200.0)
//!         .with_spread(0.1)
//!         .with_speed(6.0))?;
//!     let floor = scene.create_collision("floor", CollisionConfig::ground(0.0)
//!         .with_resilience(0.4)
//!         .with_friction(0.2))?;
//!
//!     scene.connect_field(gravity, water)?;
//!     scene.connect_emitter(fountain, water)?;
//!     scene.connect_collision(floor, water)?;
//!
//!     scene.advance_to(120, &AbortHandle::new())?;
//!     scene.write_checkpoints("cache".as_ref(), false)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Scene
//!
//! [`Scene`] owns every entity and the timeline. Each entity kind has
//! `create_*`, `query_*` and `edit_*` operations and is addressed by a
//! copyable handle ([`SystemId`], [`FieldId`], ...). Frames advance with
//! [`Scene::step`] or [`Scene::advance_to`].
//!
//! ### Particle Systems
//!
//! A [`ParticleSystem`] stores particles as columns: built-in position,
//! velocity, mass, age, lifespan, state and collision count, plus any number
//! of custom attributes declared at runtime. Typed attribute bundles use
//! `#[derive(Attributes)]`:
//!
//! ```ignore
//! #[derive(Attributes, Clone, Debug, PartialEq)]
//! struct Heat {
//!     temperature: f32,
//!     #[attribute(name = "rgbPP")]
//!     color: Vec3,
//! }
//!
//! scene.system_mut(water)?.declare_attributes::<Heat>()?;
//! ```
//!
//! ### Fields, Emitters and Collisions
//!
//! Fields are pure force functions, emitters create particles at a rate and
//! collision surfaces bounce them. All three are read-only during a step and
//! shared by reference between systems.
//!
//! ### Springs and Rigid Bodies
//!
//! [`SpringNetwork`]s connect particles (of one or two systems) or fixed
//! points. Rigid bodies are simulated by the scene's [`RigidBodySolver`].
//!
//! ### Cache
//!
//! Every simulated frame is cached per system. Cached frames are loaded
//! instead of simulated, and [`Scene::advance_to`] resumes from the nearest
//! one. Checkpoint files store a frame on disk in a bit-exact binary format
//! or as JSON.

extern crate self as dynfx;

pub mod attributes;
pub mod cache;
pub mod collision;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod field;
pub mod integrator;
pub mod noise;
pub mod particle;
pub mod rigid;
pub mod sampling;
pub mod scene;
pub mod spring;
pub mod system;
pub mod time;
pub mod volume;

pub use attributes::{AttributeKind, AttributeValue, Attributes};
pub use cache::FrameCache;
pub use collision::{CollisionConfig, CollisionGeometry, CollisionSurface};
pub use config::SceneConfig;
pub use dynfx_derive::Attributes;
pub use emitter::{CyclePolicy, Emitter, EmitterConfig, EmitterKind};
pub use error::{DynamicsError, EntityKind, Result};
pub use event::{EventConfig, EventOutcome, EventTrigger};
pub use field::{EvalMode, Field, FieldConfig, FieldKind};
pub use glam::{Quat, Vec3};
pub use integrator::IntegratorKind;
pub use particle::{LifespanMode, ParticleId, ParticleState};
pub use rigid::{BodyState, RigidBodyConfig, RigidBodySolver, RigidShape, SolverConfig, SolverMethod};
pub use scene::{AbortHandle, BodyId, CollisionId, EmitterId, FieldId, FrameReport, NetworkId, Scene, SystemId};
pub use spring::{SpringConfig, SpringEnd, SpringNetwork};
pub use system::{ParticleSystem, SpringOrder, SystemConfig};
pub use time::DynGlobals;
pub use volume::VolumeShape;

/// Common imports.
///
/// ```ignore
/// use dynfx::prelude::*;
/// ```
pub mod prelude {
    pub use crate::attributes::{AttributeKind, AttributeValue, Attributes};
    pub use crate::collision::{CollisionConfig, CollisionGeometry};
    pub use crate::emitter::{CyclePolicy, EmitterConfig, EmitterKind};
    pub use crate::error::{DynamicsError, Result};
    pub use crate::event::{EventConfig, EventOutcome, EventTrigger};
    pub use crate::field::{EvalMode, FieldConfig, FieldKind};
    pub use crate::integrator::IntegratorKind;
    pub use crate::particle::{LifespanMode, ParticleId};
    pub use crate::rigid::{RigidBodyConfig, RigidShape, SolverConfig, SolverMethod};
    pub use crate::scene::{AbortHandle, BodyId, FieldId, Scene, SystemId};
    pub use crate::spring::{SpringConfig, SpringEnd};
    pub use crate::system::{SpringOrder, SystemConfig};
    pub use crate::time::DynGlobals;
    pub use crate::volume::VolumeShape;
    pub use dynfx_derive::Attributes;
    pub use glam::{Quat, Vec3};
}
