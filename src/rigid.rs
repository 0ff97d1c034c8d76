//! Rigid body solver.
//!
//! Bodies are spheres, boxes or planes. Each step the solver:
//!
//! 1. accumulates the external force and connected field forces on every
//!    active body (fields act at the centre of mass)
//! 2. integrates linear and angular motion with the selected method
//! 3. detects contacts between active bodies and between active and passive
//!    bodies, skipping pairs allowed to interpenetrate
//! 4. resolves contacts with sequential impulses (restitution from the
//!    average bounciness, Coulomb friction with static and dynamic
//!    coefficients, torque from off-centre contact points)
//! 5. pushes overlapping bodies apart
//!
//! Passive bodies are kinematic: they collide but are never integrated and
//! are only moved between steps. Ignored bodies take no part at all.
//!
//! # Methods
//!
//! | Method | Notes |
//! |--------|-------|
//! | [`SolverMethod::Euler`] | Semi-implicit, one force evaluation |
//! | [`SolverMethod::RungeKutta4`] | Classical RK4 |
//! | [`SolverMethod::AdaptiveRk4`] | RK4 with step doubling; halves the step while the error exceeds `tolerance` (default) |

use crate::error::{DynamicsError, EntityKind, Result};
use crate::field::Field;
use crate::scene::BodyId;
use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Collision shape, centred on the body origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RigidShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// Infinite plane through the body origin. Always passive.
    Plane { normal: Vec3 },
}

/// Participation of a body in the simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyState {
    /// Integrated, collides, affected by fields.
    #[default]
    Active,
    /// Kinematic: collides but is never integrated.
    Passive,
    /// Excluded from the simulation.
    Ignored,
}

/// Rigid body parameters and initial motion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyConfig {
    pub shape: RigidShape,
    #[serde(default = "default_mass")]
    pub mass: f32,
    /// Position of the body origin.
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub orientation: Quat,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub angular_velocity: Vec3,
    /// Centre of mass relative to the body origin, in body space.
    #[serde(default)]
    pub center_of_mass: Vec3,
    #[serde(default = "default_bounciness")]
    pub bounciness: f32,
    #[serde(default = "default_friction")]
    pub static_friction: f32,
    #[serde(default = "default_friction")]
    pub dynamic_friction: f32,
    /// Constant external force applied at the centre of mass.
    #[serde(default)]
    pub force: Vec3,
    #[serde(default)]
    pub state: BodyState,
}

fn default_mass() -> f32 {
    1.0
}

fn default_bounciness() -> f32 {
    0.6
}

fn default_friction() -> f32 {
    0.2
}

impl RigidBodyConfig {
    pub fn new(shape: RigidShape) -> Self {
        let state = match shape {
            RigidShape::Plane { .. } => BodyState::Passive,
            _ => BodyState::Active,
        };
        Self {
            shape,
            mass: 1.0,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            center_of_mass: Vec3::ZERO,
            bounciness: default_bounciness(),
            static_friction: default_friction(),
            dynamic_friction: default_friction(),
            force: Vec3::ZERO,
            state,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(RigidShape::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(RigidShape::Box { half_extents })
    }

    /// Ground plane facing +Y.
    pub fn ground() -> Self {
        Self::new(RigidShape::Plane { normal: Vec3::Y })
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_bounciness(mut self, bounciness: f32) -> Self {
        self.bounciness = bounciness;
        self
    }

    pub fn with_friction(mut self, static_friction: f32, dynamic_friction: f32) -> Self {
        self.static_friction = static_friction;
        self.dynamic_friction = dynamic_friction;
        self
    }

    pub fn with_force(mut self, force: Vec3) -> Self {
        self.force = force;
        self
    }

    pub fn passive(mut self) -> Self {
        self.state = BodyState::Passive;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.state = BodyState::Ignored;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.mass.is_nan() || self.mass <= 0.0 {
            return Err(DynamicsError::invalid("mass", format!("{} is not positive", self.mass)));
        }
        let bad_extent = match self.shape {
            RigidShape::Sphere { radius } => !(radius.is_finite() && radius > 0.0),
            RigidShape::Box { half_extents } => !(half_extents.is_finite() && half_extents.min_element() > 0.0),
            RigidShape::Plane { normal } => normal.length() < 1e-6,
        };
        if bad_extent {
            return Err(DynamicsError::invalid("shape", "degenerate rigid body shape"));
        }
        if self.static_friction < 0.0 || self.dynamic_friction < 0.0 {
            return Err(DynamicsError::invalid("friction", "friction must not be negative"));
        }
        Ok(())
    }

    /// Body-space inertia diagonal about the centre.
    fn inertia(&self) -> Vec3 {
        match self.shape {
            RigidShape::Sphere { radius } => Vec3::splat(0.4 * self.mass * radius * radius),
            RigidShape::Box { half_extents: h } => {
                let h2 = h * h;
                Vec3::new(h2.y + h2.z, h2.x + h2.z, h2.x + h2.y) * (self.mass / 3.0)
            }
            RigidShape::Plane { .. } => Vec3::ZERO,
        }
    }
}

/// Position and velocity of a body's centre of mass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyMotion {
    /// World position of the centre of mass.
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl BodyMotion {
    fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.orientation.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
    }
}

/// A body: parameters plus current motion.
#[derive(Clone, Debug)]
pub struct RigidBody {
    name: String,
    config: RigidBodyConfig,
    motion: BodyMotion,
    inv_mass: f32,
    inv_inertia: Vec3,
}

impl RigidBody {
    pub fn new(name: impl Into<String>, config: RigidBodyConfig) -> Result<Self> {
        let mut body = Self {
            name: name.into(),
            config: RigidBodyConfig::ground(),
            motion: BodyMotion {
                position: Vec3::ZERO,
                orientation: Quat::IDENTITY,
                velocity: Vec3::ZERO,
                angular_velocity: Vec3::ZERO,
            },
            inv_mass: 0.0,
            inv_inertia: Vec3::ZERO,
        };
        body.set_config(config)?;
        Ok(body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RigidBodyConfig {
        &self.config
    }

    /// Replace parameters and reset motion to the configured pose and velocity.
    pub fn set_config(&mut self, mut config: RigidBodyConfig) -> Result<()> {
        config.validate()?;
        if matches!(config.shape, RigidShape::Plane { .. }) && config.state == BodyState::Active {
            log::debug!("plane body '{}' is always passive", self.name);
            config.state = BodyState::Passive;
        }
        config.orientation = config.orientation.normalize();
        let active = config.state == BodyState::Active;
        self.inv_mass = if active { 1.0 / config.mass } else { 0.0 };
        self.inv_inertia = if active {
            let i = config.inertia();
            Vec3::new(recip(i.x), recip(i.y), recip(i.z))
        } else {
            Vec3::ZERO
        };
        self.motion = BodyMotion {
            position: config.position + config.orientation * config.center_of_mass,
            orientation: config.orientation,
            velocity: config.velocity,
            angular_velocity: config.angular_velocity,
        };
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> BodyState {
        self.config.state
    }

    pub fn motion(&self) -> &BodyMotion {
        &self.motion
    }

    /// World position of the body origin (shape centre).
    pub fn origin(&self) -> Vec3 {
        self.motion.position - self.motion.orientation * self.config.center_of_mass
    }

    /// Move a passive body between steps.
    pub fn set_pose(&mut self, origin: Vec3, orientation: Quat) {
        let orientation = orientation.normalize();
        self.motion.orientation = orientation;
        self.motion.position = origin + orientation * self.config.center_of_mass;
    }

    pub fn set_velocity(&mut self, velocity: Vec3, angular_velocity: Vec3) {
        self.motion.velocity = velocity;
        self.motion.angular_velocity = angular_velocity;
    }

    fn inv_inertia_world(&self, orientation: Quat) -> Mat3 {
        let r = Mat3::from_quat(orientation);
        r * Mat3::from_diagonal(self.inv_inertia) * r.transpose()
    }

    fn inertia_world(&self, orientation: Quat) -> Mat3 {
        let r = Mat3::from_quat(orientation);
        r * Mat3::from_diagonal(self.config.inertia()) * r.transpose()
    }

    fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.motion.velocity + self.motion.angular_velocity.cross(point - self.motion.position)
    }

    fn apply_impulse(&mut self, impulse: Vec3, point: Vec3) {
        if self.inv_mass == 0.0 {
            return;
        }
        let r = point - self.motion.position;
        self.motion.velocity += impulse * self.inv_mass;
        self.motion.angular_velocity += self.inv_inertia_world(self.motion.orientation) * r.cross(impulse);
    }
}

fn recip(x: f32) -> f32 {
    if x > 0.0 {
        1.0 / x
    } else {
        0.0
    }
}

/// Integration method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    Euler,
    RungeKutta4,
    #[default]
    AdaptiveRk4,
}

/// Solver parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub method: SolverMethod,
    /// Sequential impulse passes per step.
    #[serde(default = "default_iterations")]
    pub contact_iterations: u32,
    /// Adaptive RK4 error tolerance.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Maximum halvings of the step for adaptive RK4.
    #[serde(default = "default_subdivisions")]
    pub max_subdivisions: u32,
    /// Fraction of penetration removed per step.
    #[serde(default = "default_correction")]
    pub position_correction: f32,
    /// Penetration left uncorrected to keep resting contacts stable.
    #[serde(default = "default_slop")]
    pub slop: f32,
}

fn default_iterations() -> u32 {
    8
}

fn default_tolerance() -> f32 {
    1e-4
}

fn default_subdivisions() -> u32 {
    6
}

fn default_correction() -> f32 {
    0.8
}

fn default_slop() -> f32 {
    1e-3
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::AdaptiveRk4,
            contact_iterations: default_iterations(),
            tolerance: default_tolerance(),
            max_subdivisions: default_subdivisions(),
            position_correction: default_correction(),
            slop: default_slop(),
        }
    }
}

impl SolverConfig {
    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_contact_iterations(mut self, iterations: u32) -> Self {
        self.contact_iterations = iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Contact between bodies `a` and `b`; `normal` points from `a` to `b`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub a: usize,
    pub b: usize,
    pub point: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

/// Cached motion of every body.
#[derive(Clone, Debug, PartialEq)]
pub struct RigidSnapshot {
    pub motions: Vec<BodyMotion>,
}

/// Time derivative of a body's motion.
#[derive(Clone, Copy)]
struct Derivative {
    velocity: Vec3,
    acceleration: Vec3,
    spin: Quat,
    angular_acceleration: Vec3,
}

/// The rigid body solver.
#[derive(Clone, Debug, Default)]
pub struct RigidBodySolver {
    config: SolverConfig,
    bodies: Vec<RigidBody>,
    allowed: HashSet<(usize, usize)>,
}

impl RigidBodySolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            bodies: Vec::new(),
            allowed: HashSet::new(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SolverConfig) {
        self.config = config;
    }

    pub fn add_body(&mut self, body: RigidBody) -> BodyId {
        self.bodies.push(body);
        BodyId(self.bodies.len() as u32 - 1)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn body(&self, id: BodyId) -> Result<&RigidBody> {
        self.bodies
            .get(id.0 as usize)
            .ok_or_else(|| DynamicsError::not_found(EntityKind::RigidBody, id))
    }

    pub fn body_mut(&mut self, id: BodyId) -> Result<&mut RigidBody> {
        self.bodies
            .get_mut(id.0 as usize)
            .ok_or_else(|| DynamicsError::not_found(EntityKind::RigidBody, id))
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &RigidBody)> {
        self.bodies.iter().enumerate().map(|(i, b)| (BodyId(i as u32), b))
    }

    fn pair(a: usize, b: usize) -> (usize, usize) {
        (a.min(b), a.max(b))
    }

    /// Let two bodies pass through each other (or stop letting them).
    pub fn allow_interpenetration(&mut self, a: BodyId, b: BodyId, allow: bool) -> Result<()> {
        self.body(a)?;
        self.body(b)?;
        let key = Self::pair(a.0 as usize, b.0 as usize);
        if allow {
            self.allowed.insert(key);
        } else {
            self.allowed.remove(&key);
        }
        Ok(())
    }

    /// Return every body to its configured pose and velocity.
    pub fn reset(&mut self) -> Result<()> {
        for body in &mut self.bodies {
            let config = body.config.clone();
            body.set_config(config)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RigidSnapshot {
        RigidSnapshot {
            motions: self.bodies.iter().map(|b| b.motion).collect(),
        }
    }

    pub fn restore(&mut self, snapshot: &RigidSnapshot) {
        for (body, motion) in self.bodies.iter_mut().zip(&snapshot.motions) {
            body.motion = *motion;
        }
    }

    // =========================================================================
    // STEP
    // =========================================================================

    /// Advance all active bodies by `dt`.
    pub fn step(&mut self, dt: f32, time: f32, fields: &[&Field]) {
        if dt <= 0.0 {
            return;
        }
        for i in 0..self.bodies.len() {
            if self.bodies[i].state() != BodyState::Active {
                continue;
            }
            let body = &self.bodies[i];
            let next = match self.config.method {
                SolverMethod::Euler => euler(body, body.motion, dt, time, fields),
                SolverMethod::RungeKutta4 => rk4(body, body.motion, dt, time, fields),
                SolverMethod::AdaptiveRk4 => adaptive(
                    body,
                    body.motion,
                    dt,
                    time,
                    fields,
                    self.config.tolerance,
                    self.config.max_subdivisions,
                ),
            };
            if next.is_finite() {
                self.bodies[i].motion = next;
            } else {
                log::warn!("rigid body '{}' produced non-finite motion; step skipped", body.name);
            }
        }

        let contacts = self.detect_contacts();
        if !contacts.is_empty() {
            log::trace!("{} rigid contacts", contacts.len());
            self.resolve_contacts(&contacts);
            self.correct_positions(&contacts);
        }
    }

    /// All current contacts.
    pub fn detect_contacts(&self) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for a in 0..self.bodies.len() {
            for b in (a + 1)..self.bodies.len() {
                let (ba, bb) = (&self.bodies[a], &self.bodies[b]);
                if ba.state() == BodyState::Ignored || bb.state() == BodyState::Ignored {
                    continue;
                }
                if ba.state() != BodyState::Active && bb.state() != BodyState::Active {
                    continue;
                }
                if self.allowed.contains(&(a, b)) {
                    continue;
                }
                collide(a, ba, b, bb, &mut contacts);
            }
        }
        contacts
    }

    fn resolve_contacts(&mut self, contacts: &[Contact]) {
        let mut normal_impulse = vec![0.0f32; contacts.len()];
        let mut friction_impulse = vec![Vec3::ZERO; contacts.len()];
        // Restitution targets from the approach speed before any impulse.
        let targets: Vec<f32> = contacts
            .iter()
            .map(|c| {
                let (a, b) = (&self.bodies[c.a], &self.bodies[c.b]);
                let vn = (b.velocity_at(c.point) - a.velocity_at(c.point)).dot(c.normal);
                let e = 0.5 * (a.config.bounciness + b.config.bounciness);
                if vn < 0.0 {
                    -e * vn
                } else {
                    0.0
                }
            })
            .collect();

        for _ in 0..self.config.contact_iterations.max(1) {
            for (k, c) in contacts.iter().enumerate() {
                let n = c.normal;
                let (a, b) = (&self.bodies[c.a], &self.bodies[c.b]);
                let ra = c.point - a.motion.position;
                let rb = c.point - b.motion.position;
                let rel = b.velocity_at(c.point) - a.velocity_at(c.point);

                // Normal
                let k_n = effective_mass(a, b, ra, rb, n);
                if k_n <= 0.0 {
                    continue;
                }
                let vn = rel.dot(n);
                let total = (normal_impulse[k] + (targets[k] - vn) / k_n).max(0.0);
                let dj = total - normal_impulse[k];
                normal_impulse[k] = total;

                // Friction, clamped to the Coulomb cone
                let tangential = rel - n * vn;
                let mut friction = Vec3::ZERO;
                if let Some(t) = tangential.try_normalize() {
                    let k_t = effective_mass(a, b, ra, rb, t);
                    if k_t > 0.0 {
                        let mu_s = 0.5 * (a.config.static_friction + b.config.static_friction);
                        let mu_d = 0.5 * (a.config.dynamic_friction + b.config.dynamic_friction);
                        let mut candidate = friction_impulse[k] - t * (tangential.length() / k_t);
                        if candidate.length() > mu_s * total {
                            candidate = candidate.normalize_or_zero() * (mu_d * total);
                        }
                        friction = candidate - friction_impulse[k];
                        friction_impulse[k] = candidate;
                    }
                }

                let impulse = n * dj + friction;
                self.bodies[c.a].apply_impulse(-impulse, c.point);
                self.bodies[c.b].apply_impulse(impulse, c.point);
            }
        }
    }

    fn correct_positions(&mut self, contacts: &[Contact]) {
        for c in contacts {
            let (ia, ib) = (self.bodies[c.a].inv_mass, self.bodies[c.b].inv_mass);
            let total = ia + ib;
            if total == 0.0 {
                continue;
            }
            let depth = (c.depth - self.config.slop).max(0.0) * self.config.position_correction;
            let shift = c.normal * (depth / total);
            self.bodies[c.a].motion.position -= shift * ia;
            self.bodies[c.b].motion.position += shift * ib;
        }
    }
}

fn effective_mass(a: &RigidBody, b: &RigidBody, ra: Vec3, rb: Vec3, dir: Vec3) -> f32 {
    let ang_a = (a.inv_inertia_world(a.motion.orientation) * ra.cross(dir)).cross(ra);
    let ang_b = (b.inv_inertia_world(b.motion.orientation) * rb.cross(dir)).cross(rb);
    a.inv_mass + b.inv_mass + dir.dot(ang_a + ang_b)
}

// =============================================================================
// INTEGRATION
// =============================================================================

fn linear_acceleration(body: &RigidBody, position: Vec3, velocity: Vec3, time: f32, fields: &[&Field]) -> Vec3 {
    let mass = body.config.mass;
    let mut force = body.config.force;
    for field in fields {
        force += field.evaluate(position, velocity, mass, time);
    }
    force / mass
}

fn derivative(body: &RigidBody, m: &BodyMotion, time: f32, fields: &[&Field]) -> Derivative {
    let w = m.angular_velocity;
    let inertia = body.inertia_world(m.orientation);
    let inv_inertia = body.inv_inertia_world(m.orientation);
    Derivative {
        velocity: m.velocity,
        acceleration: linear_acceleration(body, m.position, m.velocity, time, fields),
        spin: Quat::from_xyzw(w.x, w.y, w.z, 0.0) * m.orientation * 0.5,
        // Torque-free Euler equations: I dw/dt = -w x (I w)
        angular_acceleration: inv_inertia * (-w.cross(inertia * w)),
    }
}

fn offset(m: &BodyMotion, d: &Derivative, dt: f32) -> BodyMotion {
    BodyMotion {
        position: m.position + d.velocity * dt,
        orientation: (m.orientation + d.spin * dt).normalize(),
        velocity: m.velocity + d.acceleration * dt,
        angular_velocity: m.angular_velocity + d.angular_acceleration * dt,
    }
}

fn euler(body: &RigidBody, m: BodyMotion, dt: f32, time: f32, fields: &[&Field]) -> BodyMotion {
    let d = derivative(body, &m, time, fields);
    let velocity = m.velocity + d.acceleration * dt;
    let angular_velocity = m.angular_velocity + d.angular_acceleration * dt;
    let w = angular_velocity;
    let spin = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * m.orientation * 0.5;
    BodyMotion {
        position: m.position + velocity * dt,
        orientation: (m.orientation + spin * dt).normalize(),
        velocity,
        angular_velocity,
    }
}

fn rk4(body: &RigidBody, m: BodyMotion, dt: f32, time: f32, fields: &[&Field]) -> BodyMotion {
    let half = dt * 0.5;
    let k1 = derivative(body, &m, time, fields);
    let k2 = derivative(body, &offset(&m, &k1, half), time + half, fields);
    let k3 = derivative(body, &offset(&m, &k2, half), time + half, fields);
    let k4 = derivative(body, &offset(&m, &k3, dt), time + dt, fields);
    let s = dt / 6.0;
    BodyMotion {
        position: m.position + (k1.velocity + 2.0 * k2.velocity + 2.0 * k3.velocity + k4.velocity) * s,
        orientation: (m.orientation + (k1.spin + k2.spin * 2.0 + k3.spin * 2.0 + k4.spin) * s).normalize(),
        velocity: m.velocity
            + (k1.acceleration + 2.0 * k2.acceleration + 2.0 * k3.acceleration + k4.acceleration) * s,
        angular_velocity: m.angular_velocity
            + (k1.angular_acceleration
                + 2.0 * k2.angular_acceleration
                + 2.0 * k3.angular_acceleration
                + k4.angular_acceleration)
                * s,
    }
}

fn motion_error(a: &BodyMotion, b: &BodyMotion) -> f32 {
    (a.position - b.position)
        .length()
        .max((a.velocity - b.velocity).length())
        .max((a.angular_velocity - b.angular_velocity).length())
}

/// RK4 with step doubling: compare one full step against two half steps and
/// recurse on each half while the difference exceeds `tolerance`.
fn adaptive(
    body: &RigidBody,
    m: BodyMotion,
    dt: f32,
    time: f32,
    fields: &[&Field],
    tolerance: f32,
    depth: u32,
) -> BodyMotion {
    let full = rk4(body, m, dt, time, fields);
    let half = dt * 0.5;
    let mid = rk4(body, m, half, time, fields);
    let two_halves = rk4(body, mid, half, time + half, fields);
    if depth == 0 || motion_error(&full, &two_halves) <= tolerance {
        return two_halves;
    }
    let mid = adaptive(body, m, half, time, fields, tolerance, depth - 1);
    adaptive(body, mid, half, time + half, fields, tolerance, depth - 1)
}

// =============================================================================
// CONTACTS
// =============================================================================

fn box_vertices(center: Vec3, rotation: Quat, h: Vec3) -> [Vec3; 8] {
    let mut out = [Vec3::ZERO; 8];
    for (i, v) in out.iter_mut().enumerate() {
        let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
        let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
        let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
        *v = center + rotation * (h * Vec3::new(sx, sy, sz));
    }
    out
}

/// Contact for `point` inside box `(center, rotation, h)`, normal pointing
/// out of the box through the nearest face.
fn point_in_box(point: Vec3, center: Vec3, rotation: Quat, h: Vec3) -> Option<(Vec3, f32)> {
    let local = rotation.inverse() * (point - center);
    if local.abs().cmpgt(h).any() {
        return None;
    }
    let gap = h - local.abs();
    let (axis, depth) = if gap.x <= gap.y && gap.x <= gap.z {
        (Vec3::X * local.x.signum(), gap.x)
    } else if gap.y <= gap.z {
        (Vec3::Y * local.y.signum(), gap.y)
    } else {
        (Vec3::Z * local.z.signum(), gap.z)
    };
    Some((rotation * axis, depth))
}

fn collide(ia: usize, a: &RigidBody, ib: usize, b: &RigidBody, out: &mut Vec<Contact>) {
    let (ca, qa) = (a.origin(), a.motion.orientation);
    let (cb, qb) = (b.origin(), b.motion.orientation);
    match (a.config.shape, b.config.shape) {
        (RigidShape::Plane { .. }, RigidShape::Plane { .. }) => {}

        (RigidShape::Plane { normal }, other) => plane_contacts(ia, ca, qa * normal.normalize(), ib, cb, qb, other, out),
        (other, RigidShape::Plane { normal }) => {
            let start = out.len();
            plane_contacts(ib, cb, qb * normal.normalize(), ia, ca, qa, other, out);
            flip(&mut out[start..]);
        }

        (RigidShape::Sphere { radius: ra }, RigidShape::Sphere { radius: rb }) => {
            let d = cb - ca;
            let dist = d.length();
            if dist < ra + rb {
                let normal = d.try_normalize().unwrap_or(Vec3::Y);
                out.push(Contact {
                    a: ia,
                    b: ib,
                    point: ca + normal * (ra - 0.5 * (ra + rb - dist)),
                    normal,
                    depth: ra + rb - dist,
                });
            }
        }

        (RigidShape::Box { half_extents }, RigidShape::Sphere { radius }) => {
            let start = out.len();
            sphere_box(ib, cb, radius, ia, ca, qa, half_extents, out);
            flip(&mut out[start..]);
        }
        (RigidShape::Sphere { radius }, RigidShape::Box { half_extents }) => {
            sphere_box(ia, ca, radius, ib, cb, qb, half_extents, out);
        }

        (RigidShape::Box { half_extents: ha }, RigidShape::Box { half_extents: hb }) => {
            // Vertices of a inside b: normal leaves b, so points from b to a.
            for v in box_vertices(ca, qa, ha) {
                if let Some((n, depth)) = point_in_box(v, cb, qb, hb) {
                    out.push(Contact {
                        a: ia,
                        b: ib,
                        point: v,
                        normal: -n,
                        depth,
                    });
                }
            }
            for v in box_vertices(cb, qb, hb) {
                if let Some((n, depth)) = point_in_box(v, ca, qa, ha) {
                    out.push(Contact {
                        a: ia,
                        b: ib,
                        point: v,
                        normal: n,
                        depth,
                    });
                }
            }
        }
    }
}

fn flip(contacts: &mut [Contact]) {
    for c in contacts {
        std::mem::swap(&mut c.a, &mut c.b);
        c.normal = -c.normal;
    }
}

/// Contacts between a plane and another shape; normal points from the plane.
#[allow(clippy::too_many_arguments)]
fn plane_contacts(
    ip: usize,
    point: Vec3,
    normal: Vec3,
    io: usize,
    center: Vec3,
    rotation: Quat,
    shape: RigidShape,
    out: &mut Vec<Contact>,
) {
    match shape {
        RigidShape::Sphere { radius } => {
            let dist = (center - point).dot(normal);
            if dist < radius {
                out.push(Contact {
                    a: ip,
                    b: io,
                    point: center - normal * dist,
                    normal,
                    depth: radius - dist,
                });
            }
        }
        RigidShape::Box { half_extents } => {
            for v in box_vertices(center, rotation, half_extents) {
                let dist = (v - point).dot(normal);
                if dist < 0.0 {
                    out.push(Contact {
                        a: ip,
                        b: io,
                        point: v,
                        normal,
                        depth: -dist,
                    });
                }
            }
        }
        RigidShape::Plane { .. } => {}
    }
}

/// Sphere/box contact; normal points from the sphere to the box.
#[allow(clippy::too_many_arguments)]
fn sphere_box(
    is: usize,
    center: Vec3,
    radius: f32,
    ib: usize,
    box_center: Vec3,
    rotation: Quat,
    h: Vec3,
    out: &mut Vec<Contact>,
) {
    let local = rotation.inverse() * (center - box_center);
    let closest = local.clamp(-h, h);
    let diff = local - closest;
    let dist = diff.length();
    let (normal_out, depth, surface) = if dist > 1e-6 {
        if dist >= radius {
            return;
        }
        (rotation * (diff / dist), radius - dist, box_center + rotation * closest)
    } else {
        // Centre inside the box: leave through the nearest face.
        match point_in_box(center, box_center, rotation, h) {
            Some((n, gap)) => (n, radius + gap, center),
            None => return,
        }
    };
    out.push(Contact {
        a: is,
        b: ib,
        point: surface,
        normal: -normal_out,
        depth,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldConfig;

    fn gravity() -> Field {
        Field::new("g", FieldConfig::gravity(9.8))
    }

    #[test]
    fn test_plane_is_always_passive() {
        let body = RigidBody::new("floor", RigidBodyConfig::ground()).unwrap();
        assert_eq!(body.state(), BodyState::Passive);
    }

    #[test]
    fn test_free_fall_rk4_is_exact() {
        let mut solver = RigidBodySolver::new(SolverConfig::default().with_method(SolverMethod::RungeKutta4));
        let id = solver.add_body(RigidBody::new("ball", RigidBodyConfig::sphere(0.5)).unwrap());
        let g = gravity();
        solver.step(1.0, 0.0, &[&g]);
        let m = solver.body(id).unwrap().motion();
        assert!((m.velocity.y + 9.8).abs() < 1e-4);
        assert!((m.position.y + 4.9).abs() < 1e-4);
    }

    #[test]
    fn test_passive_body_never_moves() {
        let mut solver = RigidBodySolver::default();
        let id = solver.add_body(RigidBody::new("box", RigidBodyConfig::cuboid(Vec3::ONE).passive()).unwrap());
        let g = gravity();
        for _ in 0..10 {
            solver.step(0.1, 0.0, &[&g]);
        }
        assert_eq!(solver.body(id).unwrap().origin(), Vec3::ZERO);
    }

    #[test]
    fn test_sphere_comes_to_rest_on_ground() {
        let mut solver = RigidBodySolver::default();
        solver.add_body(RigidBody::new("floor", RigidBodyConfig::ground().with_bounciness(0.0)).unwrap());
        let ball = solver.add_body(
            RigidBody::new(
                "ball",
                RigidBodyConfig::sphere(0.5)
                    .with_position(Vec3::new(0.0, 2.0, 0.0))
                    .with_bounciness(0.0),
            )
            .unwrap(),
        );
        let g = gravity();
        for _ in 0..120 {
            solver.step(1.0 / 24.0, 0.0, &[&g]);
        }
        let m = solver.body(ball).unwrap().motion();
        assert!((m.position.y - 0.5).abs() < 0.02, "rest height {}", m.position.y);
        assert!(m.velocity.length() < 0.01);
    }

    #[test]
    fn test_elastic_spheres_exchange_velocity() {
        let mut solver = RigidBodySolver::new(SolverConfig::default().with_method(SolverMethod::Euler));
        let cfg = RigidBodyConfig::sphere(1.0).with_bounciness(1.0).with_friction(0.0, 0.0);
        let a = solver.add_body(RigidBody::new("a", cfg.clone().with_velocity(Vec3::X)).unwrap());
        let b = solver.add_body(RigidBody::new("b", cfg.with_position(Vec3::new(1.95, 0.0, 0.0))).unwrap());
        solver.step(0.001, 0.0, &[]);
        let va = solver.body(a).unwrap().motion().velocity;
        let vb = solver.body(b).unwrap().motion().velocity;
        assert!(va.length() < 1e-4);
        assert!((vb - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn test_allowed_pair_passes_through() {
        let mut solver = RigidBodySolver::new(SolverConfig::default().with_method(SolverMethod::Euler));
        let cfg = RigidBodyConfig::sphere(1.0);
        let a = solver.add_body(RigidBody::new("a", cfg.clone().with_velocity(Vec3::X)).unwrap());
        let b = solver.add_body(RigidBody::new("b", cfg.with_position(Vec3::new(1.0, 0.0, 0.0))).unwrap());
        solver.allow_interpenetration(a, b, true).unwrap();
        assert!(solver.detect_contacts().is_empty());
        solver.step(0.1, 0.0, &[]);
        assert_eq!(solver.body(a).unwrap().motion().velocity, Vec3::X);
    }

    #[test]
    fn test_box_rests_on_ground() {
        let mut solver = RigidBodySolver::default();
        solver.add_body(RigidBody::new("floor", RigidBodyConfig::ground()).unwrap());
        let crate_box = solver.add_body(
            RigidBody::new(
                "crate",
                RigidBodyConfig::cuboid(Vec3::splat(0.5))
                    .with_position(Vec3::new(0.0, 1.0, 0.0))
                    .with_bounciness(0.0),
            )
            .unwrap(),
        );
        let g = gravity();
        for _ in 0..96 {
            solver.step(1.0 / 24.0, 0.0, &[&g]);
        }
        let y = solver.body(crate_box).unwrap().origin().y;
        assert!(y > 0.3 && y < 0.75, "box settled at {}", y);
    }

    #[test]
    fn test_sphere_box_contact_normal() {
        let mut solver = RigidBodySolver::default();
        solver.add_body(RigidBody::new("box", RigidBodyConfig::cuboid(Vec3::ONE).passive()).unwrap());
        solver.add_body(
            RigidBody::new("ball", RigidBodyConfig::sphere(0.5).with_position(Vec3::new(0.0, 1.4, 0.0))).unwrap(),
        );
        let contacts = solver.detect_contacts();
        assert_eq!(contacts.len(), 1);
        let c = contacts[0];
        // From box (a) to ball (b)
        assert_eq!((c.a, c.b), (0, 1));
        assert!((c.normal - Vec3::Y).length() < 1e-5);
        assert!((c.depth - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_adaptive_subdivides_spin() {
        let cfg = RigidBodyConfig::cuboid(Vec3::new(1.0, 0.2, 0.5)).with_angular_velocity(Vec3::new(0.1, 5.0, 0.1));
        let body = RigidBody::new("spinner", cfg).unwrap();
        let start = body.motion;
        let coarse = rk4(&body, start, 0.5, 0.0, &[]);
        let fine = adaptive(&body, start, 0.5, 0.0, &[], 1e-5, 6);
        // Rotational kinetic energy is conserved by the exact solution.
        let energy = |m: &BodyMotion| m.angular_velocity.dot(body.inertia_world(m.orientation) * m.angular_velocity);
        let e0 = energy(&start);
        assert!((energy(&fine) - e0).abs() <= (energy(&coarse) - e0).abs() + 1e-6);
    }

    #[test]
    fn test_invalid_mass_rejected() {
        assert!(RigidBody::new("b", RigidBodyConfig::sphere(1.0).with_mass(0.0)).is_err());
    }
}
