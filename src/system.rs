//! Particle systems.
//!
//! A [`ParticleSystem`] stores its particles as parallel columns (the
//! built-in id, position, velocity, mass, age, lifespan, state and collision
//! count, plus any custom attributes) in creation order. Every column holds
//! one value per particle at all times: rows are only ever appended together
//! and compacted together.
//!
//! # Step
//!
//! The scene drives each step in phases so that emitters, fields, springs
//! and collision surfaces stay read-only while particles are advanced:
//!
//! 1. [`begin_step`](ParticleSystem::begin_step) promotes pending particles to live
//! 2. [`emit`](ParticleSystem::emit) appends this step's emitted particles as pending
//! 3. [`integrate`](ParticleSystem::integrate) accumulates forces, integrates,
//!    resolves collisions, ages particles and runs event rules
//! 4. [`apply_spring_impulses`](ParticleSystem::apply_spring_impulses) for
//!    systems whose springs act after the fields
//! 5. [`end_step`](ParticleSystem::end_step) removes dead particles
//!
//! With the `parallel` feature, step 3 runs across particles with rayon.

use crate::attributes::{AttributeDecl, AttributeKind, AttributeStore, AttributeValue, Attributes, Column};
use crate::collision::CollisionSurface;
use crate::emitter::{EmitStep, Emitter};
use crate::error::{DynamicsError, EntityKind, Result};
use crate::event::{EventConfig, EventSpawn};
use crate::field::{EvalMode, Field};
use crate::integrator::{IntegratorKind, Kinematic};
use crate::particle::{LifespanMode, NewParticle, ParticleId, ParticleRecord, ParticleState, LIFESPAN_PP};
use crate::scene::{CollisionId, EmitterId, FieldId, SystemId};
use crate::spring::SpringForces;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Names reserved for built-in columns.
pub const BUILTIN_ATTRIBUTES: &[&str] = &[
    "id",
    "position",
    "velocity",
    "mass",
    "age",
    "lifespan",
    "state",
    "collision_count",
];

/// When spring forces act relative to field forces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpringOrder {
    /// Springs are summed with the field forces from start-of-step positions.
    #[default]
    BeforeFields,
    /// Springs are evaluated on the integrated positions and applied as a
    /// second velocity kick.
    AfterFields,
}

/// A particle present when the system starts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitialParticle {
    pub position: Vec3,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default = "default_one")]
    pub mass: f32,
}

fn default_one() -> f32 {
    1.0
}

fn default_start_frame() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// Particle system parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Fraction of velocity kept each step, in [0, 1].
    #[serde(default = "default_one")]
    pub conserve: f32,
    /// First frame the system simulates.
    #[serde(default = "default_start_frame")]
    pub start_frame: i64,
    #[serde(default)]
    pub integrator: IntegratorKind,
    #[serde(default)]
    pub lifespan: LifespanMode,
    #[serde(default)]
    pub spring_order: SpringOrder,
    /// Scale on field forces, in [0, 1].
    #[serde(default = "default_one")]
    pub dynamic_weight: f32,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub initial: Vec<InitialParticle>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            conserve: 1.0,
            start_frame: 1,
            integrator: IntegratorKind::Euler,
            lifespan: LifespanMode::Infinite,
            spring_order: SpringOrder::BeforeFields,
            dynamic_weight: 1.0,
            cache_enabled: true,
            attributes: Vec::new(),
            events: Vec::new(),
            initial: Vec::new(),
        }
    }
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conserve(mut self, conserve: f32) -> Self {
        self.conserve = conserve;
        self
    }

    pub fn with_start_frame(mut self, frame: i64) -> Self {
        self.start_frame = frame;
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorKind) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_lifespan(mut self, lifespan: LifespanMode) -> Self {
        self.lifespan = lifespan;
        self
    }

    pub fn with_spring_order(mut self, order: SpringOrder) -> Self {
        self.spring_order = order;
        self
    }

    pub fn with_dynamic_weight(mut self, weight: f32) -> Self {
        self.dynamic_weight = weight;
        self
    }

    pub fn with_event(mut self, event: EventConfig) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_particle(mut self, position: Vec3, velocity: Vec3) -> Self {
        self.initial.push(InitialParticle {
            position,
            velocity,
            mass: 1.0,
        });
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.conserve) {
            return Err(DynamicsError::invalid("conserve", format!("{} is outside [0, 1]", self.conserve)));
        }
        if !(0.0..=1.0).contains(&self.dynamic_weight) {
            return Err(DynamicsError::invalid(
                "dynamic_weight",
                format!("{} is outside [0, 1]", self.dynamic_weight),
            ));
        }
        if let Some(p) = self.initial.iter().find(|p| p.mass.is_nan() || p.mass <= 0.0) {
            return Err(DynamicsError::invalid("mass", format!("initial particle mass {} is not positive", p.mass)));
        }
        Ok(())
    }
}

/// All per-particle columns of a system.
///
/// This is the unit the cache stores and restores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleData {
    pub ids: Vec<ParticleId>,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub masses: Vec<f32>,
    pub ages: Vec<f32>,
    pub lifespans: Vec<f32>,
    pub states: Vec<ParticleState>,
    pub collisions: Vec<u32>,
    pub attributes: AttributeStore,
    /// Next id to hand out.
    pub next_id: u64,
}

impl ParticleData {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row of `id`. Ids are strictly increasing in creation order.
    pub fn index_of(&self, id: ParticleId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    fn push(&mut self, p: &NewParticle, lifespan: &LifespanMode, state: ParticleState) -> ParticleId {
        let id = ParticleId(self.next_id);
        self.next_id += 1;
        self.ids.push(id);
        self.positions.push(p.position);
        self.velocities.push(p.velocity);
        self.masses.push(p.mass);
        self.ages.push(p.age.max(0.0));
        self.lifespans.push(lifespan.initial(id));
        self.states.push(state);
        self.collisions.push(0);
        self.attributes.push_default();
        id
    }

    fn retain(&mut self, keep: &[bool]) {
        fn retain<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut i = 0;
            values.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
        retain(&mut self.ids, keep);
        retain(&mut self.positions, keep);
        retain(&mut self.velocities, keep);
        retain(&mut self.masses, keep);
        retain(&mut self.ages, keep);
        retain(&mut self.lifespans, keep);
        retain(&mut self.states, keep);
        retain(&mut self.collisions, keep);
        self.attributes.retain(keep);
    }

    /// Check that every column has one value per particle.
    pub fn validate(&self) -> Result<()> {
        let n = self.ids.len();
        let lens = [
            self.positions.len(),
            self.velocities.len(),
            self.masses.len(),
            self.ages.len(),
            self.lifespans.len(),
            self.states.len(),
            self.collisions.len(),
            self.attributes.len(),
        ];
        if lens.iter().any(|l| *l != n) {
            return Err(DynamicsError::CheckpointFormat(format!(
                "column lengths {:?} do not match {} particles",
                lens, n
            )));
        }
        if self.ids.windows(2).any(|w| w[0] >= w[1]) || self.ids.last().is_some_and(|id| id.0 >= self.next_id) {
            return Err(DynamicsError::CheckpointFormat("particle ids out of order".into()));
        }
        Ok(())
    }
}

/// An emitter connected to a system, with its fractional count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmitterLink {
    pub emitter: EmitterId,
    pub carry: f32,
}

/// A system's state at the end of a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemSnapshot {
    pub frame: i64,
    pub data: ParticleData,
    /// Emitter carries in connection order.
    pub carries: Vec<f32>,
}

/// Inputs for one integration step.
pub struct StepContext<'a> {
    /// Handle of the system being stepped (for spring force lookup).
    pub system: SystemId,
    pub dt: f32,
    /// Simulation time at the start of the step.
    pub time: f32,
    pub fields: &'a [&'a Field],
    pub collisions: &'a [&'a CollisionSurface],
    /// Spring forces to sum with the field forces, if any.
    pub springs: Option<&'a SpringForces>,
}

/// What happened during one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    pub integrated: usize,
    pub died: usize,
    pub nan_killed: usize,
    pub collisions: u32,
    pub spawns: Vec<EventSpawn>,
}

struct Integrated {
    position: Vec3,
    velocity: Vec3,
    hits: u32,
    finite: bool,
}

/// A particle system.
#[derive(Clone, Debug)]
pub struct ParticleSystem {
    name: String,
    config: SystemConfig,
    data: ParticleData,
    fields: Vec<FieldId>,
    emitters: Vec<EmitterLink>,
    collisions: Vec<CollisionId>,
    nan_killed: u64,
}

impl ParticleSystem {
    /// Create a system in its start state.
    pub fn new(name: impl Into<String>, config: SystemConfig) -> Result<Self> {
        config.validate()?;
        let mut system = Self {
            name: name.into(),
            config,
            data: ParticleData::default(),
            fields: Vec::new(),
            emitters: Vec::new(),
            collisions: Vec::new(),
            nan_killed: 0,
        };
        system.reset()?;
        Ok(system)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Replace the parameters. Particles are kept; declared attributes are added.
    pub fn set_config(&mut self, config: SystemConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.declare_configured()
    }

    fn declare_configured(&mut self) -> Result<()> {
        let decls = self.config.attributes.clone();
        for decl in decls {
            self.declare_attribute(&decl.name, decl.kind, Some(decl.default))?;
        }
        if self.config.lifespan == LifespanMode::PerParticle {
            self.declare_attribute(LIFESPAN_PP, AttributeKind::Float, Some(AttributeValue::Float(f32::MAX)))?;
        }
        Ok(())
    }

    /// Return to the start state: configured attributes and initial particles only.
    pub fn reset(&mut self) -> Result<()> {
        self.data = ParticleData::default();
        self.nan_killed = 0;
        for link in &mut self.emitters {
            link.carry = 0.0;
        }
        self.declare_configured()?;
        let initial: Vec<NewParticle> = self
            .config
            .initial
            .iter()
            .map(|p| NewParticle::new(p.position, p.velocity).with_mass(p.mass))
            .collect();
        for p in &initial {
            self.data.push(p, &self.config.lifespan, ParticleState::Live);
        }
        Ok(())
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn emitters(&self) -> &[EmitterLink] {
        &self.emitters
    }

    pub fn collisions(&self) -> &[CollisionId] {
        &self.collisions
    }

    pub(crate) fn connect_field(&mut self, id: FieldId) {
        if !self.fields.contains(&id) {
            self.fields.push(id);
        }
    }

    pub(crate) fn connect_emitter(&mut self, id: EmitterId) {
        if !self.emitters.iter().any(|l| l.emitter == id) {
            self.emitters.push(EmitterLink { emitter: id, carry: 0.0 });
        }
    }

    pub(crate) fn connect_collision(&mut self, id: CollisionId) {
        if !self.collisions.contains(&id) {
            self.collisions.push(id);
        }
    }

    pub(crate) fn disconnect_field(&mut self, id: FieldId) {
        self.fields.retain(|f| *f != id);
    }

    pub(crate) fn disconnect_emitter(&mut self, id: EmitterId) {
        self.emitters.retain(|l| l.emitter != id);
    }

    pub(crate) fn disconnect_collision(&mut self, id: CollisionId) {
        self.collisions.retain(|c| *c != id);
    }

    // =========================================================================
    // PARTICLES
    // =========================================================================

    /// Number of particles in any state.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of live particles.
    pub fn live_count(&self) -> usize {
        self.data.states.iter().filter(|s| **s == ParticleState::Live).count()
    }

    /// Particles killed for non-finite state since the last reset.
    pub fn nan_killed(&self) -> u64 {
        self.nan_killed
    }

    pub fn data(&self) -> &ParticleData {
        &self.data
    }

    pub fn ids(&self) -> &[ParticleId] {
        &self.data.ids
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.data.positions
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.data.velocities
    }

    pub fn masses(&self) -> &[f32] {
        &self.data.masses
    }

    pub fn ages(&self) -> &[f32] {
        &self.data.ages
    }

    pub fn lifespans(&self) -> &[f32] {
        &self.data.lifespans
    }

    pub fn states(&self) -> &[ParticleState] {
        &self.data.states
    }

    pub fn collision_counts(&self) -> &[u32] {
        &self.data.collisions
    }

    /// Built-in values of the particle at row `index`.
    pub fn record(&self, index: usize) -> Option<ParticleRecord> {
        let d = &self.data;
        (index < d.len()).then(|| ParticleRecord {
            id: d.ids[index],
            position: d.positions[index],
            velocity: d.velocities[index],
            mass: d.masses[index],
            age: d.ages[index],
            lifespan: d.lifespans[index],
            state: d.states[index],
            collisions: d.collisions[index],
        })
    }

    /// Built-in values of particle `id`.
    pub fn get(&self, id: ParticleId) -> Option<ParticleRecord> {
        self.data.index_of(id).and_then(|i| self.record(i))
    }

    /// Position and velocity of particle `id`.
    pub fn kinematic(&self, id: ParticleId) -> Option<Kinematic> {
        self.data
            .index_of(id)
            .map(|i| Kinematic::new(self.data.positions[i], self.data.velocities[i]))
    }

    /// Ids and positions of every particle, for spring creation.
    pub fn points(&self) -> Vec<(ParticleId, Vec3)> {
        self.data.ids.iter().copied().zip(self.data.positions.iter().copied()).collect()
    }

    fn index(&self, id: ParticleId) -> Result<usize> {
        self.data
            .index_of(id)
            .ok_or_else(|| DynamicsError::not_found(EntityKind::Particle, id))
    }

    /// Add live particles directly. `velocities` may be empty (all at rest)
    /// or match `positions` in length.
    pub fn add_particles(&mut self, positions: &[Vec3], velocities: &[Vec3]) -> Result<Vec<ParticleId>> {
        if !velocities.is_empty() && velocities.len() != positions.len() {
            return Err(DynamicsError::invalid(
                "velocities",
                format!("{} velocities for {} positions", velocities.len(), positions.len()),
            ));
        }
        Ok(positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let v = velocities.get(i).copied().unwrap_or(Vec3::ZERO);
                self.data
                    .push(&NewParticle::new(*p, v), &self.config.lifespan, ParticleState::Live)
            })
            .collect())
    }

    /// Add pending particles, integrated from the next step on.
    pub fn add_pending(&mut self, particles: &[NewParticle]) -> Vec<ParticleId> {
        particles
            .iter()
            .filter(|p| p.mass > 0.0 && p.position.is_finite() && p.velocity.is_finite())
            .map(|p| self.data.push(p, &self.config.lifespan, ParticleState::Pending))
            .collect()
    }

    /// Kill particle `id` and compact immediately.
    pub fn kill(&mut self, id: ParticleId) -> Result<()> {
        let i = self.index(id)?;
        self.data.states[i] = ParticleState::Dead;
        self.compact();
        Ok(())
    }

    fn compact(&mut self) -> usize {
        let keep: Vec<bool> = self.data.states.iter().map(|s| *s != ParticleState::Dead).collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed > 0 {
            self.data.retain(&keep);
        }
        removed
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// Declare a custom attribute. Existing particles get `default`.
    pub fn declare_attribute(&mut self, name: &str, kind: AttributeKind, default: Option<AttributeValue>) -> Result<()> {
        if BUILTIN_ATTRIBUTES.contains(&name) {
            return Err(DynamicsError::AttributeExists(name.to_string()));
        }
        self.data.attributes.declare(name, kind, default)
    }

    /// Declare every attribute of a typed bundle.
    pub fn declare_attributes<A: Attributes>(&mut self) -> Result<()> {
        for (name, kind) in A::SCHEMA {
            self.declare_attribute(name, *kind, None)?;
        }
        Ok(())
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.data.attributes
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        BUILTIN_ATTRIBUTES.contains(&name) || self.data.attributes.contains(name)
    }

    /// Value of attribute `name` (built-in or custom) for particle `id`.
    pub fn attribute_value(&self, name: &str, id: ParticleId) -> Result<AttributeValue> {
        let i = self.index(id)?;
        let d = &self.data;
        Ok(match name {
            "id" => AttributeValue::Int(d.ids[i].0 as i32),
            "position" => AttributeValue::Vector(d.positions[i]),
            "velocity" => AttributeValue::Vector(d.velocities[i]),
            "mass" => AttributeValue::Float(d.masses[i]),
            "age" => AttributeValue::Float(d.ages[i]),
            "lifespan" => AttributeValue::Float(d.lifespans[i]),
            "state" => AttributeValue::Int(d.states[i] as i32),
            "collision_count" => AttributeValue::Int(d.collisions[i] as i32),
            _ => d.attributes.get(name, i)?,
        })
    }

    /// Set attribute `name` for particle `id`. Only between steps.
    pub fn set_attribute_value(&mut self, name: &str, id: ParticleId, value: AttributeValue) -> Result<()> {
        let i = self.index(id)?;
        let d = &mut self.data;
        match name {
            "position" => d.positions[i] = value.as_vector(name)?,
            "velocity" => d.velocities[i] = value.as_vector(name)?,
            "mass" => {
                let m = value.as_float(name)?;
                if m.is_nan() || m <= 0.0 {
                    return Err(DynamicsError::invalid("mass", format!("{} is not positive", m)));
                }
                d.masses[i] = m;
            }
            "age" => d.ages[i] = value.as_float(name)?.max(0.0),
            "lifespan" => d.lifespans[i] = value.as_float(name)?,
            "id" | "state" | "collision_count" => {
                return Err(DynamicsError::invalid("attribute", format!("'{}' is read-only", name)))
            }
            _ => d.attributes.set(name, i, value)?,
        }
        Ok(())
    }

    /// Write a typed bundle to particle `id`.
    pub fn write_attributes<A: Attributes>(&mut self, id: ParticleId, values: &A) -> Result<()> {
        for (name, value) in values.to_values() {
            self.set_attribute_value(name, id, value)?;
        }
        Ok(())
    }

    /// Read a typed bundle from particle `id`.
    pub fn read_attributes<A: Attributes>(&self, id: ParticleId) -> Result<A> {
        self.index(id)?;
        A::from_values(&|name| self.attribute_value(name, id).ok())
    }

    pub fn floats(&self, name: &str) -> Result<&[f32]> {
        self.data.attributes.floats(name)
    }

    pub fn vectors(&self, name: &str) -> Result<&[Vec3]> {
        self.data.attributes.vectors(name)
    }

    pub fn ints(&self, name: &str) -> Result<&[i32]> {
        self.data.attributes.ints(name)
    }

    /// Mutable float column, for driving per-particle values between steps.
    pub fn floats_mut(&mut self, name: &str) -> Result<&mut [f32]> {
        self.data.attributes.floats_mut(name)
    }

    pub fn vectors_mut(&mut self, name: &str) -> Result<&mut [Vec3]> {
        self.data.attributes.vectors_mut(name)
    }

    // =========================================================================
    // STEP
    // =========================================================================

    /// Promote last step's pending particles.
    pub fn begin_step(&mut self) {
        for state in &mut self.data.states {
            if *state == ParticleState::Pending {
                *state = ParticleState::Live;
            }
        }
    }

    /// Emit from connected emitters. `emitters` is in connection order.
    pub fn emit(&mut self, emitters: &[&Emitter], step: &EmitStep) -> usize {
        let mut emitted = 0;
        for (link, emitter) in self.emitters.iter_mut().zip(emitters) {
            let particles = emitter.emit(step, &mut link.carry);
            for p in &particles {
                self.data.push(p, &self.config.lifespan, ParticleState::Pending);
            }
            emitted += particles.len();
        }
        emitted
    }

    /// Advance live particles by one step.
    pub fn integrate(&mut self, ctx: &StepContext) -> Result<StepReport> {
        let live: Vec<usize> = (0..self.data.len())
            .filter(|&i| self.data.states[i] == ParticleState::Live)
            .collect();
        let mut report = StepReport {
            integrated: live.len(),
            ..StepReport::default()
        };
        if live.is_empty() {
            return Ok(report);
        }

        let dt = ctx.dt;
        let weight = self.config.dynamic_weight;
        let conserve = self.config.conserve;
        let integrator = self.config.integrator.integrator();

        let (vertex_fields, centroid_fields): (Vec<&Field>, Vec<&Field>) = ctx
            .fields
            .iter()
            .copied()
            .partition(|f| f.config().mode == EvalMode::PerVertex);

        // Centroid fields are evaluated once per step and held constant.
        let centroid_force = if centroid_fields.is_empty() {
            Vec3::ZERO
        } else {
            let points: Vec<Vec3> = live.iter().map(|&i| self.data.positions[i]).collect();
            let velocities: Vec<Vec3> = live.iter().map(|&i| self.data.velocities[i]).collect();
            let masses: Vec<f32> = live.iter().map(|&i| self.data.masses[i]).collect();
            centroid_fields
                .iter()
                .map(|f| {
                    f.evaluate_points(&points, &velocities, &masses, ctx.time)
                        .first()
                        .copied()
                        .unwrap_or(Vec3::ZERO)
                })
                .sum()
        };

        let data = &self.data;
        let integrate_one = |&i: &usize| -> Integrated {
            let mass = data.masses[i];
            let spring = ctx
                .springs
                .and_then(|s| s.get(&(ctx.system, data.ids[i])))
                .copied()
                .unwrap_or(Vec3::ZERO);
            let accel = |p: Vec3, v: Vec3| -> Vec3 {
                let mut force = centroid_force;
                for field in &vertex_fields {
                    force += field.evaluate(p, v, mass, ctx.time);
                }
                (force * weight + spring) / mass
            };
            let start = data.positions[i];
            let next = integrator.advance(Kinematic::new(start, data.velocities[i]), dt, conserve, &accel);
            if !next.is_finite() {
                return Integrated {
                    position: start,
                    velocity: Vec3::ZERO,
                    hits: 0,
                    finite: false,
                };
            }
            let mut position = next.position;
            let mut velocity = next.velocity;
            let mut hits = 0;
            for surface in ctx.collisions {
                let r = surface.resolve(start, position, velocity, dt);
                position = r.position;
                velocity = r.velocity;
                hits += r.hits;
            }
            Integrated {
                position,
                velocity,
                hits,
                finite: position.is_finite() && velocity.is_finite(),
            }
        };

        #[cfg(feature = "parallel")]
        let results: Vec<Integrated> = live.par_iter().map(integrate_one).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Integrated> = live.iter().map(integrate_one).collect();

        let per_particle_lifespan = if self.config.lifespan == LifespanMode::PerParticle {
            Some(self.data.attributes.floats(LIFESPAN_PP)?.to_vec())
        } else {
            None
        };

        for (&i, r) in live.iter().zip(&results) {
            let d = &mut self.data;
            if !r.finite {
                d.states[i] = ParticleState::Dead;
                report.nan_killed += 1;
                continue;
            }
            let before = d.collisions[i];
            d.positions[i] = r.position;
            d.velocities[i] = r.velocity;
            d.collisions[i] = before.saturating_add(r.hits);
            d.ages[i] += dt;
            if let Some(lifespans) = &per_particle_lifespan {
                d.lifespans[i] = lifespans[i];
            }
            if d.ages[i] > d.lifespans[i] {
                d.states[i] = ParticleState::Dead;
                report.died += 1;
            }
            if r.hits == 0 {
                continue;
            }
            report.collisions += r.hits;
            let Some(record) = self.record(i) else {
                continue;
            };
            for event in &self.config.events {
                if let Some(firing) = event.fire(&record, before) {
                    if firing.kill && self.data.states[i] != ParticleState::Dead {
                        self.data.states[i] = ParticleState::Dead;
                        report.died += 1;
                    }
                    report.spawns.extend(firing.spawns);
                }
            }
        }

        if report.nan_killed > 0 {
            self.nan_killed += report.nan_killed as u64;
            log::warn!(
                "system '{}': {} particles with non-finite state were killed",
                self.name,
                report.nan_killed
            );
        }
        Ok(report)
    }

    /// Apply spring forces evaluated after integration as a velocity kick.
    pub fn apply_spring_impulses(&mut self, system: SystemId, forces: &SpringForces, dt: f32) {
        if forces.is_empty() {
            return;
        }
        let d = &mut self.data;
        for i in 0..d.len() {
            if d.states[i] != ParticleState::Live {
                continue;
            }
            if let Some(f) = forces.get(&(system, d.ids[i])) {
                let dv = *f / d.masses[i] * dt;
                d.velocities[i] += dv;
                d.positions[i] += dv * dt;
                if !d.velocities[i].is_finite() || !d.positions[i].is_finite() {
                    d.states[i] = ParticleState::Dead;
                    self.nan_killed += 1;
                    log::warn!("system '{}': particle {} killed by non-finite spring force", self.name, d.ids[i]);
                }
            }
        }
    }

    /// Remove dead particles. Returns how many were removed.
    pub fn end_step(&mut self) -> usize {
        self.compact()
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Capture the current state for the cache.
    pub fn snapshot(&self, frame: i64) -> SystemSnapshot {
        SystemSnapshot {
            frame,
            data: self.data.clone(),
            carries: self.emitters.iter().map(|l| l.carry).collect(),
        }
    }

    /// Restore a cached state.
    pub fn restore(&mut self, snapshot: &SystemSnapshot) -> Result<()> {
        snapshot.data.validate()?;
        let mut data = snapshot.data.clone();
        data.attributes.reindex();
        self.data = data;
        for (link, carry) in self.emitters.iter_mut().zip(&snapshot.carries) {
            link.carry = *carry;
        }
        Ok(())
    }

    /// Custom attribute columns, for checkpoint export.
    pub fn columns(&self) -> &[Column] {
        self.data.attributes.columns()
    }
}
