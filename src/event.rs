//! Collision events.
//!
//! An event rule watches a particle system's per-particle collision count and
//! fires when a particle collides. The outcome can kill the particle, spawn
//! new particles (into the same or another system) or both.
//!
//! Events are evaluated after collision response. Spawned particles join
//! their target system as pending and are integrated from the next step.

use crate::particle::{NewParticle, ParticleRecord};
use crate::sampling::Sampler;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// When an event fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", content = "count", rename_all = "snake_case")]
pub enum EventTrigger {
    /// On every step in which the particle collides.
    EveryCollision,
    /// Once, on the step the collision count reaches `n`.
    CollisionCount(u32),
}

/// What happens when an event fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Kill the colliding particle.
    Die,
    /// Spawn `count` particles, keep the parent.
    Emit {
        count: u32,
        /// Name of the receiving system. `None` means the colliding system.
        #[serde(default)]
        target: Option<String>,
        /// Cone half-angle around the parent's direction, as a fraction of PI.
        #[serde(default)]
        spread: f32,
        /// Spawn speed as a multiple of the parent's speed.
        #[serde(default = "default_speed")]
        speed: f32,
    },
    /// Spawn `count` particles into the colliding system and kill the parent.
    Split {
        count: u32,
        #[serde(default)]
        spread: f32,
        #[serde(default = "default_speed")]
        speed: f32,
    },
}

fn default_speed() -> f32 {
    1.0
}

/// One event rule attached to a particle system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub name: String,
    pub trigger: EventTrigger,
    pub outcome: EventOutcome,
    /// Spawn a random number of particles in `1..=count` instead of `count`.
    #[serde(default)]
    pub random: bool,
    #[serde(default)]
    pub seed: u64,
}

/// A particle produced by an event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSpawn {
    /// Receiving system name, `None` for the colliding system.
    pub target: Option<String>,
    pub particle: NewParticle,
}

/// Result of an event firing for one particle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventFiring {
    pub kill: bool,
    pub spawns: Vec<EventSpawn>,
}

impl EventConfig {
    /// Rule that kills particles on their `n`th collision.
    pub fn die_on(name: impl Into<String>, n: u32) -> Self {
        Self {
            name: name.into(),
            trigger: EventTrigger::CollisionCount(n),
            outcome: EventOutcome::Die,
            random: false,
            seed: 0,
        }
    }

    /// Rule that splits particles into `count` on every collision.
    pub fn split(name: impl Into<String>, count: u32, spread: f32) -> Self {
        Self {
            name: name.into(),
            trigger: EventTrigger::EveryCollision,
            outcome: EventOutcome::Split {
                count,
                spread,
                speed: 1.0,
            },
            random: false,
            seed: 0,
        }
    }

    pub fn with_trigger(mut self, trigger: EventTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn randomized(mut self) -> Self {
        self.random = true;
        self
    }

    /// Name of another system this rule spawns into, if any.
    pub fn target(&self) -> Option<&str> {
        match &self.outcome {
            EventOutcome::Emit { target, .. } => target.as_deref(),
            _ => None,
        }
    }

    /// Whether the rule fires for a collision count going from `before` to `after`.
    pub fn triggered(&self, before: u32, after: u32) -> bool {
        if after <= before {
            return false;
        }
        match self.trigger {
            EventTrigger::EveryCollision => true,
            EventTrigger::CollisionCount(n) => before < n && n <= after,
        }
    }

    /// Evaluate the rule for a particle whose collision count went from
    /// `before` to `particle.collisions` this step.
    pub fn fire(&self, particle: &ParticleRecord, before: u32) -> Option<EventFiring> {
        if !self.triggered(before, particle.collisions) {
            return None;
        }
        log::trace!("event '{}' fired for particle {}", self.name, particle.id);
        let (kill, count, target, spread, speed) = match &self.outcome {
            EventOutcome::Die => return Some(EventFiring { kill: true, spawns: Vec::new() }),
            EventOutcome::Emit {
                count,
                target,
                spread,
                speed,
            } => (false, *count, target.clone(), *spread, *speed),
            EventOutcome::Split { count, spread, speed } => (true, *count, None, *spread, *speed),
        };

        let mut sampler = Sampler::derived(self.seed, particle.id.0 ^ (u64::from(particle.collisions) << 40));
        let count = if self.random && count > 1 {
            1 + (sampler.random() * count as f32) as u32 % count
        } else {
            count
        };
        let parent_speed = particle.velocity.length();
        let axis = particle.velocity.try_normalize().unwrap_or(Vec3::Y);
        let half_angle = spread.clamp(0.0, 1.0) * PI;

        let spawns = (0..count)
            .map(|_| {
                let dir = sampler.cone_direction(axis, half_angle);
                EventSpawn {
                    target: target.clone(),
                    particle: NewParticle::new(particle.position, dir * parent_speed * speed)
                        .with_mass(particle.mass),
                }
            })
            .collect();
        Some(EventFiring { kill, spawns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{ParticleId, ParticleState};

    fn record(collisions: u32) -> ParticleRecord {
        ParticleRecord {
            id: ParticleId(3),
            position: Vec3::new(1.0, 0.0, 0.0),
            velocity: Vec3::new(0.0, 2.0, 0.0),
            mass: 0.5,
            age: 0.0,
            lifespan: f32::INFINITY,
            state: ParticleState::Live,
            collisions,
        }
    }

    #[test]
    fn test_count_trigger_fires_once() {
        let rule = EventConfig::die_on("die", 2);
        assert!(rule.fire(&record(1), 0).is_none());
        assert!(rule.fire(&record(2), 1).is_some_and(|f| f.kill));
        assert!(rule.fire(&record(3), 2).is_none());
    }

    #[test]
    fn test_multiple_hits_in_one_step_cross_threshold() {
        let rule = EventConfig::die_on("die", 2);
        assert!(rule.triggered(0, 3));
    }

    #[test]
    fn test_split_spawns_and_kills() {
        let rule = EventConfig::split("split", 3, 0.0);
        let firing = rule.fire(&record(1), 0).unwrap();
        assert!(firing.kill);
        assert_eq!(firing.spawns.len(), 3);
        for spawn in &firing.spawns {
            assert!(spawn.target.is_none());
            assert_eq!(spawn.particle.position, Vec3::new(1.0, 0.0, 0.0));
            assert!((spawn.particle.velocity - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
            assert_eq!(spawn.particle.mass, 0.5);
        }
    }

    #[test]
    fn test_random_count_in_range() {
        let rule = EventConfig::split("s", 4, 0.5).randomized().with_seed(8);
        for hits in 1..20 {
            let n = rule.fire(&record(hits), hits - 1).unwrap().spawns.len();
            assert!((1..=4).contains(&n));
        }
    }

    #[test]
    fn test_emit_targets_other_system() {
        let rule = EventConfig {
            name: "sparks".into(),
            trigger: EventTrigger::EveryCollision,
            outcome: EventOutcome::Emit {
                count: 2,
                target: Some("sparks".into()),
                spread: 0.2,
                speed: 0.5,
            },
            random: false,
            seed: 1,
        };
        assert_eq!(rule.target(), Some("sparks"));
        let firing = rule.fire(&record(1), 0).unwrap();
        assert!(!firing.kill);
        assert!(firing.spawns.iter().all(|s| s.target.as_deref() == Some("sparks")));
    }
}
