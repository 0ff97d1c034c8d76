//! Particle integrators.
//!
//! Both integrators apply the conserve coefficient to the incoming velocity
//! and then advance `dp/dt = v, dv/dt = a(p, v)` over one step:
//!
//! ```text
//! v_new = conserve * v_old + a * dt
//! ```
//!
//! [`Euler`] is the semi-implicit form (velocity first, then position with the
//! new velocity). [`RungeKutta4`] re-evaluates the acceleration at the
//! classical four stages, which keeps stiff spring and field setups stable
//! at larger steps.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Position and velocity of one point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Kinematic {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Kinematic {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Whether both vectors are finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// Advances one point over one step.
///
/// `accel` returns the acceleration (force / mass) at a given position and
/// velocity. Implementations must be pure so the step can run in parallel.
pub trait Integrator: Send + Sync {
    fn name(&self) -> &'static str;

    fn advance(&self, state: Kinematic, dt: f32, conserve: f32, accel: &dyn Fn(Vec3, Vec3) -> Vec3) -> Kinematic;
}

/// Semi-implicit Euler.
#[derive(Clone, Copy, Debug, Default)]
pub struct Euler;

impl Integrator for Euler {
    fn name(&self) -> &'static str {
        "euler"
    }

    fn advance(&self, state: Kinematic, dt: f32, conserve: f32, accel: &dyn Fn(Vec3, Vec3) -> Vec3) -> Kinematic {
        let a = accel(state.position, state.velocity);
        let velocity = state.velocity * conserve + a * dt;
        Kinematic {
            position: state.position + velocity * dt,
            velocity,
        }
    }
}

/// Classical fourth-order Runge-Kutta.
#[derive(Clone, Copy, Debug, Default)]
pub struct RungeKutta4;

impl Integrator for RungeKutta4 {
    fn name(&self) -> &'static str {
        "rk4"
    }

    fn advance(&self, state: Kinematic, dt: f32, conserve: f32, accel: &dyn Fn(Vec3, Vec3) -> Vec3) -> Kinematic {
        let p0 = state.position;
        let v0 = state.velocity * conserve;
        let half = dt * 0.5;

        let k1v = accel(p0, v0);
        let k1p = v0;

        let k2p = v0 + k1v * half;
        let k2v = accel(p0 + k1p * half, k2p);

        let k3p = v0 + k2v * half;
        let k3v = accel(p0 + k2p * half, k3p);

        let k4p = v0 + k3v * dt;
        let k4v = accel(p0 + k3p * dt, k4p);

        Kinematic {
            position: p0 + (k1p + 2.0 * k2p + 2.0 * k3p + k4p) * (dt / 6.0),
            velocity: v0 + (k1v + 2.0 * k2v + 2.0 * k3v + k4v) * (dt / 6.0),
        }
    }
}

/// Integrator selection for a particle system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    #[default]
    Euler,
    RungeKutta4,
}

impl IntegratorKind {
    pub fn integrator(&self) -> &'static dyn Integrator {
        match self {
            IntegratorKind::Euler => &Euler,
            IntegratorKind::RungeKutta4 => &RungeKutta4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);

    #[test]
    fn test_constant_acceleration_velocity() {
        for kind in [IntegratorKind::Euler, IntegratorKind::RungeKutta4] {
            let out = kind
                .integrator()
                .advance(Kinematic::default(), 1.0, 1.0, &|_, _| GRAVITY);
            assert!((out.velocity - GRAVITY).length() < 1e-5, "{}", kind.integrator().name());
        }
    }

    #[test]
    fn test_rk4_exact_for_constant_acceleration() {
        let out = RungeKutta4.advance(Kinematic::default(), 1.0, 1.0, &|_, _| GRAVITY);
        // p = a t^2 / 2
        assert!((out.position - GRAVITY * 0.5).length() < 1e-5);
    }

    #[test]
    fn test_conserve_one_keeps_momentum() {
        let start = Kinematic::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        for kind in [IntegratorKind::Euler, IntegratorKind::RungeKutta4] {
            let mut s = start;
            for _ in 0..10 {
                s = kind.integrator().advance(s, 0.1, 1.0, &|_, _| Vec3::ZERO);
            }
            assert_eq!(s.velocity, start.velocity);
        }
    }

    #[test]
    fn test_conserve_zero_drops_velocity() {
        let start = Kinematic::new(Vec3::ZERO, Vec3::X);
        let out = Euler.advance(start, 0.5, 0.0, &|_, _| Vec3::ZERO);
        assert_eq!(out.velocity, Vec3::ZERO);
        assert_eq!(out.position, Vec3::ZERO);
    }

    #[test]
    fn test_rk4_more_accurate_on_spring() {
        // Unit harmonic oscillator, exact x(1) = cos(1)
        let spring = |p: Vec3, _v: Vec3| -p;
        let mut euler = Kinematic::new(Vec3::X, Vec3::ZERO);
        let mut rk4 = euler;
        for _ in 0..10 {
            euler = Euler.advance(euler, 0.1, 1.0, &spring);
            rk4 = RungeKutta4.advance(rk4, 0.1, 1.0, &spring);
        }
        let exact = 1.0f32.cos();
        assert!((rk4.position.x - exact).abs() < (euler.position.x - exact).abs());
        assert!((rk4.position.x - exact).abs() < 1e-4);
    }
}
