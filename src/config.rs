//! Scene description files.
//!
//! A [`SceneConfig`] lists every entity by name together with its
//! parameters and connections. Names are resolved to handles when the scene
//! is built, so a dangling name fails with
//! [`DynamicsError::ReferenceNotFound`](crate::DynamicsError::ReferenceNotFound).
//!
//! ```json
//! {
//!   "globals": { "fps": 24.0, "over_samples": 2 },
//!   "fields": [{ "name": "gravity", "config": { "kind": { "type": "gravity", "direction": [0, -1, 0] }, "magnitude": 9.8 } }],
//!   "emitters": [{ "name": "fountain", "config": { "kind": { "type": "directional" }, "rate": 200.0, "direction": [0, 1, 0] } }],
//!   "collisions": [{ "name": "floor", "config": { "geometry": { "shape": "plane", "point": [0, 0, 0], "normal": [0, 1, 0] } } }],
//!   "systems": [{
//!     "name": "water",
//!     "config": { "lifespan": { "mode": "constant", "seconds": 3.0 } },
//!     "fields": ["gravity"],
//!     "emitters": ["fountain"],
//!     "collisions": ["floor"]
//!   }]
//! }
//! ```

use crate::collision::CollisionConfig;
use crate::emitter::EmitterConfig;
use crate::error::{DynamicsError, EntityKind, Result};
use crate::field::FieldConfig;
use crate::rigid::{RigidBodyConfig, SolverConfig};
use crate::scene::{NetworkId, Scene, SystemId};
use crate::spring::SpringConfig;
use crate::system::SystemConfig;
use crate::time::DynGlobals;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A named entity configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Named<T> {
    pub name: String,
    pub config: T,
}

impl<T> Named<T> {
    pub fn new(name: impl Into<String>, config: T) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// A particle system plus the names of what it is connected to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemDecl {
    pub name: String,
    #[serde(default)]
    pub config: SystemConfig,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub emitters: Vec<String>,
    #[serde(default)]
    pub collisions: Vec<String>,
}

impl SystemDecl {
    pub fn new(name: impl Into<String>, config: SystemConfig) -> Self {
        Self {
            name: name.into(),
            config,
            fields: Vec::new(),
            emitters: Vec::new(),
            collisions: Vec::new(),
        }
    }
}

/// How a network creates springs when the scene is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpringConnection {
    /// Every in-range pair of one system's particles.
    All { system: String },
    /// Consecutive particles of one system.
    Chain { system: String },
    /// In-range pairs across two systems.
    Between { first: String, second: String },
}

/// A spring network and the connections made at build time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkDecl {
    pub name: String,
    pub config: SpringConfig,
    #[serde(default)]
    pub connect: Vec<SpringConnection>,
}

/// Whole-scene description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub globals: DynGlobals,
    #[serde(default)]
    pub fields: Vec<Named<FieldConfig>>,
    #[serde(default)]
    pub emitters: Vec<Named<EmitterConfig>>,
    #[serde(default)]
    pub collisions: Vec<Named<CollisionConfig>>,
    #[serde(default)]
    pub systems: Vec<SystemDecl>,
    #[serde(default)]
    pub networks: Vec<NetworkDecl>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub bodies: Vec<Named<RigidBodyConfig>>,
    /// Fields acting on rigid bodies.
    #[serde(default)]
    pub solver_fields: Vec<String>,
    /// Body pairs allowed to pass through each other.
    #[serde(default)]
    pub allow_interpenetration: Vec<[String; 2]>,
}

impl SceneConfig {
    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Build a scene, resolving every name to a handle.
    pub fn build(&self) -> Result<Scene> {
        Scene::from_config(self)
    }
}

fn resolve<T>(found: Option<T>, kind: EntityKind, name: &str) -> Result<T> {
    found.ok_or_else(|| DynamicsError::not_found(kind, name))
}

impl Scene {
    /// Build a scene from a description.
    pub fn from_config(config: &SceneConfig) -> Result<Scene> {
        let mut scene = Scene::new(config.globals)?;
        for f in &config.fields {
            scene.create_field(&f.name, f.config.clone())?;
        }
        for e in &config.emitters {
            scene.create_emitter(&e.name, e.config.clone())?;
        }
        for c in &config.collisions {
            scene.create_collision(&c.name, c.config.clone())?;
        }

        for decl in &config.systems {
            let sys = scene.create_system(&decl.name, decl.config.clone())?;
            for name in &decl.fields {
                let field = resolve(scene.find_field(name), EntityKind::Field, name)?;
                scene.connect_field(field, sys)?;
            }
            for name in &decl.emitters {
                let emitter = resolve(scene.find_emitter(name), EntityKind::Emitter, name)?;
                scene.connect_emitter(emitter, sys)?;
            }
            for name in &decl.collisions {
                let collision = resolve(scene.find_collision(name), EntityKind::Collision, name)?;
                scene.connect_collision(collision, sys)?;
            }
        }
        // Event targets may name systems declared later in the list.
        for decl in &config.systems {
            for event in &decl.config.events {
                if let Some(target) = event.target() {
                    resolve(scene.find_system(target), EntityKind::System, target)?;
                }
            }
        }

        for decl in &config.networks {
            let net = scene.create_network(&decl.name, decl.config.clone())?;
            for connection in &decl.connect {
                connect_network(&mut scene, net, connection)?;
            }
        }

        scene.edit_solver(config.solver.clone());
        for b in &config.bodies {
            scene.create_body(&b.name, b.config.clone())?;
        }
        for name in &config.solver_fields {
            let field = resolve(scene.find_field(name), EntityKind::Field, name)?;
            scene.connect_field_to_solver(field)?;
        }
        for [a, b] in &config.allow_interpenetration {
            let a = resolve(scene.find_body(a), EntityKind::RigidBody, a)?;
            let b = resolve(scene.find_body(b), EntityKind::RigidBody, b)?;
            scene.allow_interpenetration(a, b, true)?;
        }

        log::info!(
            "scene built: {} systems, {} fields, {} emitters, {} networks, {} bodies",
            config.systems.len(),
            config.fields.len(),
            config.emitters.len(),
            config.networks.len(),
            config.bodies.len()
        );
        Ok(scene)
    }
}

fn connect_network(scene: &mut Scene, net: NetworkId, connection: &SpringConnection) -> Result<usize> {
    let system = |scene: &Scene, name: &str| -> Result<SystemId> {
        resolve(scene.find_system(name), EntityKind::System, name)
    };
    match connection {
        SpringConnection::All { system: name } => {
            let sys = system(scene, name)?;
            scene.connect_springs_all(net, sys)
        }
        SpringConnection::Chain { system: name } => {
            let sys = system(scene, name)?;
            scene.connect_springs_chain(net, sys)
        }
        SpringConnection::Between { first, second } => {
            let a = system(scene, first)?;
            let b = system(scene, second)?;
            scene.connect_springs_between(net, a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventConfig, EventOutcome, EventTrigger};
    use glam::Vec3;

    fn sample() -> SceneConfig {
        let mut water = SystemDecl::new("water", SystemConfig::new());
        water.fields.push("gravity".into());
        water.emitters.push("fountain".into());
        water.collisions.push("floor".into());
        SceneConfig {
            fields: vec![Named::new("gravity", FieldConfig::gravity(9.8))],
            emitters: vec![Named::new("fountain", EmitterConfig::directional(Vec3::Y, 48.0))],
            collisions: vec![Named::new("floor", CollisionConfig::ground(0.0))],
            systems: vec![water],
            ..SceneConfig::default()
        }
    }

    #[test]
    fn test_builds_connected_scene() {
        let scene = sample().build().unwrap();
        let water = scene.find_system("water").unwrap();
        let system = scene.system(water).unwrap();
        assert_eq!(system.fields().len(), 1);
        assert_eq!(system.emitters().len(), 1);
        assert_eq!(system.collisions().len(), 1);
    }

    #[test]
    fn test_dangling_name_fails() {
        let mut config = sample();
        config.systems[0].fields.push("wind".into());
        let err = config.build().unwrap_err();
        assert!(matches!(err, DynamicsError::ReferenceNotFound { kind: EntityKind::Field, .. }));
    }

    #[test]
    fn test_unknown_event_target_fails() {
        let mut config = sample();
        config.systems[0].config.events.push(EventConfig {
            name: "spray".into(),
            trigger: EventTrigger::EveryCollision,
            outcome: EventOutcome::Emit {
                count: 1,
                target: Some("mist".into()),
                spread: 0.0,
                speed: 1.0,
            },
            random: false,
            seed: 0,
        });
        assert!(matches!(
            config.build(),
            Err(DynamicsError::ReferenceNotFound { kind: EntityKind::System, .. })
        ));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        let config = sample();
        config.save(&path).unwrap();
        assert_eq!(SceneConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_minimal_json() {
        let json = r#"{
            "systems": [{ "name": "dust", "config": { "lifespan": { "mode": "constant", "seconds": 2.0 } } }]
        }"#;
        let config: SceneConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.globals, DynGlobals::default());
        let scene = config.build().unwrap();
        assert!(scene.find_system("dust").is_some());
    }
}
