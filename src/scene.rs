//! The scene context.
//!
//! A [`Scene`] owns every dynamics entity and the timing context, and is the
//! only place frames are advanced. Entities are addressed by small copyable
//! handles and follow the same three operations:
//!
//! | Operation | Example |
//! |-----------|---------|
//! | create | `scene.create_field("g", FieldConfig::gravity(9.8))?` |
//! | query | `scene.query_field(id)?` |
//! | edit | `scene.edit_field(id, config)?` |
//!
//! Parameters are only changed between steps. During a step every field,
//! emitter and collision surface is read-only.
//!
//! # Frames
//!
//! The scene starts at [`DynGlobals::start_frame`]. [`Scene::step`] advances
//! one frame (in `over_samples` substeps); [`Scene::advance_to`] runs up to
//! any frame, resuming from the nearest cached frame when possible. Cached
//! frames are loaded instead of simulated. After editing parameters, call
//! [`Scene::truncate_caches`] so the cache does not keep stale frames.
//!
//! # Example
//!
//! ```ignore
//! let mut scene = Scene::new(DynGlobals::new(24.0))?;
//! let sparks = scene.create_system("sparks", SystemConfig::new())?;
//! let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8))?;
//! let source = scene.create_emitter("source", EmitterConfig::omni(100.0))?;
//!
//! scene.connect_field(gravity, sparks)?;
//! scene.connect_emitter(source, sparks)?;
//! scene.advance_to(48, &AbortHandle::new())?;
//! ```

use crate::cache::{self, FrameCache};
use crate::collision::{CollisionConfig, CollisionSurface};
use crate::emitter::{EmitStep, Emitter, EmitterConfig};
use crate::error::{DynamicsError, EntityKind, Result};
use crate::event::EventSpawn;
use crate::field::{Field, FieldConfig};
use crate::integrator::Kinematic;
use crate::particle::ParticleId;
use crate::rigid::{RigidBody, RigidBodyConfig, RigidBodySolver, RigidSnapshot, SolverConfig};
use crate::spring::{PointSource, SpringConfig, SpringEnd, SpringForces, SpringNetwork};
use crate::system::{ParticleSystem, SpringOrder, StepContext, SystemConfig};
use crate::time::DynGlobals;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle to a particle system.
    SystemId,
    "system"
);
handle!(
    /// Handle to a field.
    FieldId,
    "field"
);
handle!(
    /// Handle to an emitter.
    EmitterId,
    "emitter"
);
handle!(
    /// Handle to a collision surface.
    CollisionId,
    "collision"
);
handle!(
    /// Handle to a spring network.
    NetworkId,
    "network"
);
handle!(
    /// Handle to a rigid body.
    BodyId,
    "body"
);

/// Cancels a runup between frames. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag so the handle can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Summary of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: i64,
    /// Loaded from the cache rather than simulated.
    pub from_cache: bool,
    pub emitted: usize,
    pub died: usize,
    pub spawned: usize,
    /// Particles across all systems at the end of the frame.
    pub particles: usize,
}

#[derive(Clone, Debug)]
struct SystemEntry {
    system: ParticleSystem,
    cache: FrameCache,
}

/// Particle lookup across all systems of a scene.
struct Systems<'a>(&'a [SystemEntry]);

impl PointSource for Systems<'_> {
    fn point(&self, system: SystemId, id: ParticleId) -> Option<Kinematic> {
        self.0.get(system.index())?.system.kinematic(id)
    }
}

fn lookup<'a, T>(items: &'a [T], index: usize, kind: EntityKind, id: impl ToString) -> Result<&'a T> {
    items.get(index).ok_or_else(|| DynamicsError::not_found(kind, id))
}

fn lookup_mut<'a, T>(items: &'a mut [T], index: usize, kind: EntityKind, id: impl ToString) -> Result<&'a mut T> {
    items.get_mut(index).ok_or_else(|| DynamicsError::not_found(kind, id))
}

fn ensure_unique<'a>(mut names: impl Iterator<Item = &'a str>, name: &str, kind: EntityKind) -> Result<()> {
    if names.any(|n| n == name) {
        return Err(DynamicsError::invalid("name", format!("{} '{}' already exists", kind, name)));
    }
    Ok(())
}

/// Every dynamics entity plus the timeline they are simulated on.
#[derive(Clone, Debug)]
pub struct Scene {
    globals: DynGlobals,
    frame: i64,
    systems: Vec<SystemEntry>,
    fields: Vec<Field>,
    emitters: Vec<Emitter>,
    collisions: Vec<CollisionSurface>,
    networks: Vec<SpringNetwork>,
    solver: RigidBodySolver,
    solver_fields: Vec<FieldId>,
    rigid_cache: BTreeMap<i64, RigidSnapshot>,
}

impl Default for Scene {
    fn default() -> Self {
        let globals = DynGlobals::default();
        Self {
            globals,
            frame: globals.start_frame,
            systems: Vec::new(),
            fields: Vec::new(),
            emitters: Vec::new(),
            collisions: Vec::new(),
            networks: Vec::new(),
            solver: RigidBodySolver::default(),
            solver_fields: Vec::new(),
            rigid_cache: BTreeMap::new(),
        }
    }
}

impl Scene {
    /// Empty scene at the globals' start frame.
    pub fn new(globals: DynGlobals) -> Result<Self> {
        globals.validate()?;
        Ok(Self {
            globals,
            frame: globals.start_frame,
            ..Self::default()
        })
    }

    pub fn globals(&self) -> &DynGlobals {
        &self.globals
    }

    /// Replace the timing context. Takes effect from the next step; call
    /// [`reset`](Self::reset) to restart the timeline.
    pub fn set_globals(&mut self, globals: DynGlobals) -> Result<()> {
        globals.validate()?;
        self.globals = globals;
        Ok(())
    }

    /// Frame the scene state corresponds to.
    pub fn frame(&self) -> i64 {
        self.frame
    }

    /// Simulation time of the current frame.
    pub fn time(&self) -> f32 {
        self.globals.frame_time(self.frame)
    }

    // =========================================================================
    // PARTICLE SYSTEMS
    // =========================================================================

    pub fn create_system(&mut self, name: &str, config: SystemConfig) -> Result<SystemId> {
        ensure_unique(self.systems.iter().map(|e| e.system.name()), name, EntityKind::System)?;
        let system = ParticleSystem::new(name, config)?;
        let id = SystemId(self.systems.len() as u32);
        log::debug!("created particle system '{}' as {}", name, id);
        let mut entry = SystemEntry {
            system,
            cache: FrameCache::new(),
        };
        if entry.system.config().cache_enabled {
            entry.cache.save(entry.system.snapshot(self.frame));
        }
        self.systems.push(entry);
        Ok(id)
    }

    pub fn query_system(&self, id: SystemId) -> Result<&SystemConfig> {
        Ok(self.system(id)?.config())
    }

    pub fn edit_system(&mut self, id: SystemId, config: SystemConfig) -> Result<()> {
        self.system_mut(id)?.set_config(config)
    }

    pub fn system(&self, id: SystemId) -> Result<&ParticleSystem> {
        lookup(&self.systems, id.index(), EntityKind::System, id).map(|e| &e.system)
    }

    /// Mutable access for seeding particles or driving attributes between steps.
    pub fn system_mut(&mut self, id: SystemId) -> Result<&mut ParticleSystem> {
        lookup_mut(&mut self.systems, id.index(), EntityKind::System, id).map(|e| &mut e.system)
    }

    pub fn find_system(&self, name: &str) -> Option<SystemId> {
        self.systems
            .iter()
            .position(|e| e.system.name() == name)
            .map(|i| SystemId(i as u32))
    }

    pub fn systems(&self) -> impl Iterator<Item = (SystemId, &ParticleSystem)> {
        self.systems
            .iter()
            .enumerate()
            .map(|(i, e)| (SystemId(i as u32), &e.system))
    }

    /// Frames cached for a system.
    pub fn cache(&self, id: SystemId) -> Result<&FrameCache> {
        lookup(&self.systems, id.index(), EntityKind::System, id).map(|e| &e.cache)
    }

    // =========================================================================
    // FIELDS, EMITTERS, COLLISIONS
    // =========================================================================

    pub fn create_field(&mut self, name: &str, config: FieldConfig) -> Result<FieldId> {
        ensure_unique(self.fields.iter().map(|f| f.name()), name, EntityKind::Field)?;
        self.fields.push(Field::new(name, config));
        Ok(FieldId(self.fields.len() as u32 - 1))
    }

    pub fn query_field(&self, id: FieldId) -> Result<&FieldConfig> {
        Ok(self.field(id)?.config())
    }

    pub fn edit_field(&mut self, id: FieldId, config: FieldConfig) -> Result<()> {
        lookup_mut(&mut self.fields, id.index(), EntityKind::Field, id)?.set_config(config);
        Ok(())
    }

    pub fn field(&self, id: FieldId) -> Result<&Field> {
        lookup(&self.fields, id.index(), EntityKind::Field, id)
    }

    pub fn find_field(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name() == name).map(|i| FieldId(i as u32))
    }

    pub fn create_emitter(&mut self, name: &str, config: EmitterConfig) -> Result<EmitterId> {
        ensure_unique(self.emitters.iter().map(|e| e.name()), name, EntityKind::Emitter)?;
        self.emitters.push(Emitter::new(name, config));
        Ok(EmitterId(self.emitters.len() as u32 - 1))
    }

    pub fn query_emitter(&self, id: EmitterId) -> Result<&EmitterConfig> {
        Ok(self.emitter(id)?.config())
    }

    pub fn edit_emitter(&mut self, id: EmitterId, config: EmitterConfig) -> Result<()> {
        lookup_mut(&mut self.emitters, id.index(), EntityKind::Emitter, id)?.set_config(config);
        Ok(())
    }

    pub fn emitter(&self, id: EmitterId) -> Result<&Emitter> {
        lookup(&self.emitters, id.index(), EntityKind::Emitter, id)
    }

    pub fn find_emitter(&self, name: &str) -> Option<EmitterId> {
        self.emitters.iter().position(|e| e.name() == name).map(|i| EmitterId(i as u32))
    }

    pub fn create_collision(&mut self, name: &str, config: CollisionConfig) -> Result<CollisionId> {
        ensure_unique(self.collisions.iter().map(|c| c.name()), name, EntityKind::Collision)?;
        self.collisions.push(CollisionSurface::new(name, config));
        Ok(CollisionId(self.collisions.len() as u32 - 1))
    }

    pub fn query_collision(&self, id: CollisionId) -> Result<&CollisionConfig> {
        Ok(self.collision(id)?.config())
    }

    /// Replace a surface's parameters, e.g. to move animated geometry between steps.
    pub fn edit_collision(&mut self, id: CollisionId, config: CollisionConfig) -> Result<()> {
        lookup_mut(&mut self.collisions, id.index(), EntityKind::Collision, id)?.set_config(config);
        Ok(())
    }

    pub fn collision(&self, id: CollisionId) -> Result<&CollisionSurface> {
        lookup(&self.collisions, id.index(), EntityKind::Collision, id)
    }

    pub fn find_collision(&self, name: &str) -> Option<CollisionId> {
        self.collisions
            .iter()
            .position(|c| c.name() == name)
            .map(|i| CollisionId(i as u32))
    }

    pub fn connect_field(&mut self, field: FieldId, system: SystemId) -> Result<()> {
        self.field(field)?;
        self.system_mut(system)?.connect_field(field);
        Ok(())
    }

    pub fn disconnect_field(&mut self, field: FieldId, system: SystemId) -> Result<()> {
        self.field(field)?;
        self.system_mut(system)?.disconnect_field(field);
        Ok(())
    }

    pub fn connect_emitter(&mut self, emitter: EmitterId, system: SystemId) -> Result<()> {
        self.emitter(emitter)?;
        self.system_mut(system)?.connect_emitter(emitter);
        Ok(())
    }

    pub fn disconnect_emitter(&mut self, emitter: EmitterId, system: SystemId) -> Result<()> {
        self.emitter(emitter)?;
        self.system_mut(system)?.disconnect_emitter(emitter);
        Ok(())
    }

    pub fn connect_collision(&mut self, collision: CollisionId, system: SystemId) -> Result<()> {
        self.collision(collision)?;
        self.system_mut(system)?.connect_collision(collision);
        Ok(())
    }

    pub fn disconnect_collision(&mut self, collision: CollisionId, system: SystemId) -> Result<()> {
        self.collision(collision)?;
        self.system_mut(system)?.disconnect_collision(collision);
        Ok(())
    }

    // =========================================================================
    // SPRINGS
    // =========================================================================

    pub fn create_network(&mut self, name: &str, config: SpringConfig) -> Result<NetworkId> {
        ensure_unique(self.networks.iter().map(|n| n.name()), name, EntityKind::SpringNetwork)?;
        self.networks.push(SpringNetwork::new(name, config));
        Ok(NetworkId(self.networks.len() as u32 - 1))
    }

    pub fn query_network(&self, id: NetworkId) -> Result<&SpringConfig> {
        Ok(self.network(id)?.config())
    }

    pub fn edit_network(&mut self, id: NetworkId, config: SpringConfig) -> Result<()> {
        self.network_mut(id)?.set_config(config);
        Ok(())
    }

    pub fn network(&self, id: NetworkId) -> Result<&SpringNetwork> {
        lookup(&self.networks, id.index(), EntityKind::SpringNetwork, id)
    }

    fn network_mut(&mut self, id: NetworkId) -> Result<&mut SpringNetwork> {
        lookup_mut(&mut self.networks, id.index(), EntityKind::SpringNetwork, id)
    }

    pub fn find_network(&self, name: &str) -> Option<NetworkId> {
        self.networks
            .iter()
            .position(|n| n.name() == name)
            .map(|i| NetworkId(i as u32))
    }

    fn end_position(&self, end: SpringEnd) -> Result<Vec3> {
        match end {
            SpringEnd::Fixed(p) => Ok(p),
            SpringEnd::Particle { system, id } => self
                .system(system)?
                .kinematic(id)
                .map(|k| k.position)
                .ok_or_else(|| DynamicsError::not_found(EntityKind::Particle, format!("{}{}", system, id))),
        }
    }

    /// Add one spring. Particle ends must exist.
    pub fn add_spring(
        &mut self,
        network: NetworkId,
        start: SpringEnd,
        end: SpringEnd,
        rest_length: Option<f32>,
    ) -> Result<bool> {
        let a = self.end_position(start)?;
        let b = self.end_position(end)?;
        self.network_mut(network)?.add_spring(start, end, a, b, rest_length)
    }

    /// Link every in-range pair of a system's current particles.
    pub fn connect_springs_all(&mut self, network: NetworkId, system: SystemId) -> Result<usize> {
        let points = self.system(system)?.points();
        self.network_mut(network)?.connect_all(system, &points)
    }

    /// Link a system's current particles into a chain in creation order.
    pub fn connect_springs_chain(&mut self, network: NetworkId, system: SystemId) -> Result<usize> {
        let points = self.system(system)?.points();
        self.network_mut(network)?.connect_chain(system, &points)
    }

    /// Link in-range particles of two systems.
    pub fn connect_springs_between(&mut self, network: NetworkId, first: SystemId, second: SystemId) -> Result<usize> {
        let a = self.system(first)?.points();
        let b = self.system(second)?.points();
        self.network_mut(network)?.connect_between((first, &a), (second, &b))
    }

    /// Sum of all networks' forces at the current particle state.
    pub fn spring_forces(&self) -> SpringForces {
        let source = Systems(&self.systems);
        let mut forces = SpringForces::new();
        for network in &self.networks {
            network.accumulate_into(&source, &mut forces);
        }
        forces
    }

    // =========================================================================
    // RIGID BODIES
    // =========================================================================

    pub fn create_body(&mut self, name: &str, config: RigidBodyConfig) -> Result<BodyId> {
        ensure_unique(self.solver.bodies().map(|(_, b)| b.name()), name, EntityKind::RigidBody)?;
        let body = RigidBody::new(name, config)?;
        let id = self.solver.add_body(body);
        // Older rigid snapshots do not cover the new body.
        self.rigid_cache.clear();
        self.rigid_cache.insert(self.frame, self.solver.snapshot());
        Ok(id)
    }

    pub fn query_body(&self, id: BodyId) -> Result<&RigidBodyConfig> {
        Ok(self.solver.body(id)?.config())
    }

    /// Replace a body's parameters. Its motion restarts from the new configuration.
    pub fn edit_body(&mut self, id: BodyId, config: RigidBodyConfig) -> Result<()> {
        self.solver.body_mut(id)?.set_config(config)
    }

    pub fn body(&self, id: BodyId) -> Result<&RigidBody> {
        self.solver.body(id)
    }

    pub fn find_body(&self, name: &str) -> Option<BodyId> {
        self.solver.bodies().find(|(_, b)| b.name() == name).map(|(id, _)| id)
    }

    /// Key a passive body's pose between steps.
    pub fn set_body_pose(&mut self, id: BodyId, origin: Vec3, orientation: Quat) -> Result<()> {
        self.solver.body_mut(id)?.set_pose(origin, orientation);
        Ok(())
    }

    pub fn allow_interpenetration(&mut self, a: BodyId, b: BodyId, allow: bool) -> Result<()> {
        self.solver.allow_interpenetration(a, b, allow)
    }

    pub fn query_solver(&self) -> &SolverConfig {
        self.solver.config()
    }

    pub fn edit_solver(&mut self, config: SolverConfig) {
        self.solver.set_config(config);
    }

    /// Apply a field to every active rigid body.
    pub fn connect_field_to_solver(&mut self, field: FieldId) -> Result<()> {
        self.field(field)?;
        if !self.solver_fields.contains(&field) {
            self.solver_fields.push(field);
        }
        Ok(())
    }

    // =========================================================================
    // TIMELINE
    // =========================================================================

    /// Return every system and body to its start state at the start frame.
    /// Cached frames are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.frame = self.globals.start_frame;
        for entry in &mut self.systems {
            entry.system.reset()?;
            if entry.system.config().cache_enabled {
                entry.cache.save(entry.system.snapshot(self.frame));
            }
        }
        self.solver.reset()?;
        self.rigid_cache.insert(self.frame, self.solver.snapshot());
        log::debug!("scene reset to frame {}", self.frame);
        Ok(())
    }

    /// Drop cached frames after `frame` for every system and the rigid solver.
    pub fn truncate_caches(&mut self, frame: i64) {
        for entry in &mut self.systems {
            entry.cache.truncate(frame);
        }
        if let Some(next) = frame.checked_add(1) {
            self.rigid_cache.split_off(&next);
        }
    }

    pub fn clear_caches(&mut self) {
        for entry in &mut self.systems {
            entry.cache.clear();
        }
        self.rigid_cache.clear();
    }

    /// Latest frame at or before `target` from which the whole scene can be
    /// restored. `None` when some system does not cache.
    fn resume_frame(&self, target: i64) -> Option<i64> {
        if self.systems.iter().any(|e| !e.system.config().cache_enabled) {
            return None;
        }
        let mut common: Option<BTreeSet<i64>> = None;
        let mut intersect = |frames: BTreeSet<i64>| {
            common = Some(match common.take() {
                None => frames,
                Some(c) => c.intersection(&frames).copied().collect(),
            });
        };
        for entry in &self.systems {
            intersect(entry.cache.frames().filter(|f| *f <= target).collect());
        }
        if !self.solver.is_empty() {
            intersect(self.rigid_cache.range(..=target).map(|(f, _)| *f).collect());
        }
        common?.last().copied()
    }

    fn restore_frame(&mut self, frame: i64) -> Result<()> {
        for entry in &mut self.systems {
            if let Some(snapshot) = entry.cache.load(frame) {
                entry.system.restore(snapshot)?;
            }
        }
        if let Some(snapshot) = self.rigid_cache.get(&frame) {
            self.solver.restore(snapshot);
        }
        self.frame = frame;
        Ok(())
    }

    /// Advance one frame, loading it from the cache when every system has it.
    pub fn step(&mut self) -> Result<FrameReport> {
        let next = self.frame + 1;
        if self.resume_frame(next) == Some(next) {
            self.restore_frame(next)?;
            log::debug!("frame {} loaded from cache", next);
            return Ok(FrameReport {
                frame: next,
                from_cache: true,
                particles: self.particle_count(),
                ..FrameReport::default()
            });
        }

        let mut report = FrameReport {
            frame: next,
            ..FrameReport::default()
        };
        for substep in 0..self.globals.over_samples.max(1) {
            self.substep(self.frame, substep, &mut report)?;
        }
        self.frame = next;

        for entry in &mut self.systems {
            if entry.system.config().cache_enabled {
                entry.cache.save(entry.system.snapshot(next));
            }
        }
        self.rigid_cache.insert(next, self.solver.snapshot());

        report.particles = self.particle_count();
        log::debug!(
            "frame {}: {} particles, {} emitted, {} died, {} spawned",
            next,
            report.particles,
            report.emitted,
            report.died,
            report.spawned
        );
        Ok(report)
    }

    /// Run up to `target`, resuming from the nearest cached frame, the
    /// current frame or the start state. Targets before the start frame do
    /// nothing. `abort` is checked between frames.
    pub fn advance_to(&mut self, target: i64, abort: &AbortHandle) -> Result<()> {
        if target < self.globals.start_frame {
            log::debug!("runup to {} is before the start frame; nothing to do", target);
            return Ok(());
        }
        let resume = self.resume_frame(target);
        let keep_current = self.frame <= target && resume.map_or(true, |r| r <= self.frame);
        if !keep_current {
            match resume {
                Some(frame) => self.restore_frame(frame)?,
                None => self.reset()?,
            }
        }
        if self.frame == target {
            return Ok(());
        }

        log::info!("runup from frame {} to {}", self.frame, target);
        while self.frame < target {
            if abort.is_aborted() {
                log::info!("runup aborted at frame {}", self.frame);
                return Err(DynamicsError::Aborted { frame: self.frame + 1 });
            }
            self.step()?;
        }
        log::info!("runup finished at frame {}", self.frame);
        Ok(())
    }

    fn particle_count(&self) -> usize {
        self.systems.iter().map(|e| e.system.len()).sum()
    }

    /// One oversample of the frame that starts at `frame`.
    fn substep(&mut self, frame: i64, substep: u32, report: &mut FrameReport) -> Result<()> {
        let dt = self.globals.step_dt();
        let time = self.globals.step_time(frame, substep);
        let emit = EmitStep {
            dt,
            frame,
            substep,
            substeps: self.globals.over_samples.max(1),
        };
        let active: Vec<bool> = self
            .systems
            .iter()
            .map(|e| frame >= e.system.config().start_frame)
            .collect();

        // Emission
        for (entry, _) in self.systems.iter_mut().zip(&active).filter(|(_, a)| **a) {
            entry.system.begin_step();
            let emitters: Vec<&Emitter> = entry
                .system
                .emitters()
                .iter()
                .filter_map(|l| self.emitters.get(l.emitter.index()))
                .collect();
            report.emitted += entry.system.emit(&emitters, &emit);
        }

        // Fields, springs summed before integration, collisions, events
        let before = (!self.networks.is_empty()).then(|| self.spring_forces());
        let mut spawns: Vec<(usize, EventSpawn)> = Vec::new();
        for (i, entry) in self.systems.iter_mut().enumerate() {
            if !active[i] {
                continue;
            }
            let fields: Vec<&Field> = entry
                .system
                .fields()
                .iter()
                .filter_map(|id| self.fields.get(id.index()))
                .collect();
            let collisions: Vec<&CollisionSurface> = entry
                .system
                .collisions()
                .iter()
                .filter_map(|id| self.collisions.get(id.index()))
                .collect();
            let springs = match entry.system.config().spring_order {
                SpringOrder::BeforeFields => before.as_ref(),
                SpringOrder::AfterFields => None,
            };
            let ctx = StepContext {
                system: SystemId(i as u32),
                dt,
                time,
                fields: &fields,
                collisions: &collisions,
                springs,
            };
            let step = entry.system.integrate(&ctx)?;
            report.died += step.died + step.nan_killed;
            spawns.extend(step.spawns.into_iter().map(|s| (i, s)));
        }

        // Springs evaluated on the integrated state
        let after_fields = |e: &SystemEntry| e.system.config().spring_order == SpringOrder::AfterFields;
        if !self.networks.is_empty() && self.systems.iter().zip(&active).any(|(e, a)| *a && after_fields(e)) {
            let after = self.spring_forces();
            for (i, entry) in self.systems.iter_mut().enumerate() {
                if active[i] && after_fields(entry) {
                    entry.system.apply_spring_impulses(SystemId(i as u32), &after, dt);
                }
            }
        }

        // Event spawns join their target as pending
        for (source, spawn) in spawns {
            let target = match &spawn.target {
                None => Some(source),
                Some(name) => self.systems.iter().position(|e| e.system.name() == name),
            };
            match target {
                Some(t) if active[t] => {
                    report.spawned += self.systems[t]
                        .system
                        .add_pending(std::slice::from_ref(&spawn.particle))
                        .len();
                }
                Some(_) => {}
                None => log::warn!(
                    "event in system '{}' targets unknown system '{}'",
                    self.systems[source].system.name(),
                    spawn.target.as_deref().unwrap_or_default()
                ),
            }
        }

        for entry in &mut self.systems {
            entry.system.end_step();
        }
        // Springs with a dead end stay in their network; force summation skips them.

        if !self.solver.is_empty() {
            let fields: Vec<&Field> = self
                .solver_fields
                .iter()
                .filter_map(|id| self.fields.get(id.index()))
                .collect();
            self.solver.step(dt, time, &fields);
        }
        Ok(())
    }

    // =========================================================================
    // CHECKPOINTS
    // =========================================================================

    /// Write the current frame of every system to `dir`. Returns the files written.
    pub fn write_checkpoints(&self, dir: &Path, ascii: bool) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.systems.len());
        for entry in &self.systems {
            let name = entry.system.name();
            let snapshot = entry.system.snapshot(self.frame);
            let path = cache::checkpoint_path(dir, name, self.frame, ascii);
            if ascii {
                cache::write_ascii(&path, name, &snapshot)?;
            } else {
                cache::write_checkpoint(&path, &snapshot)?;
            }
            log::info!("wrote {} particles of '{}' to {}", snapshot.data.len(), name, path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// Load a system's state from a checkpoint file (binary or `.json`).
    pub fn restore_checkpoint(&mut self, id: SystemId, path: &Path) -> Result<()> {
        let snapshot = if path.extension().is_some_and(|e| e == "json") {
            cache::read_ascii(path)?
        } else {
            cache::read_checkpoint(path)?
        };
        self.system_mut(id)?.restore(&snapshot)
    }
}

impl PointSource for Scene {
    fn point(&self, system: SystemId, id: ParticleId) -> Option<Kinematic> {
        Systems(&self.systems).point(system, id)
    }
}
