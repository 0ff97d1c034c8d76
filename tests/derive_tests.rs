//! Integration tests for the `#[derive(Attributes)]` macro.
//!
//! These tests use the generated implementations through a real
//! `ParticleSystem` rather than inspecting the expansion.

use dynfx::attributes::{AttributeKind, AttributeValue};
use dynfx::Attributes;
use dynfx::system::{ParticleSystem, SystemConfig};
use dynfx::{DynamicsError, Vec3};

#[derive(Attributes, Clone, Debug, PartialEq)]
struct Spark {
    energy: f32,
    #[attribute(name = "rgbPP")]
    color: Vec3,
    generation: u32,
    charge: i32,
}

#[derive(Attributes, Clone, Debug, PartialEq)]
struct Temperature {
    temperature: f32,
}

#[derive(Attributes, Clone, Debug, PartialEq)]
struct ClashesWithBuiltin {
    #[attribute(name = "mass")]
    weight: f32,
}

fn system_with_one() -> (ParticleSystem, dynfx::ParticleId) {
    let mut system = ParticleSystem::new("sparks", SystemConfig::new()).unwrap();
    let ids = system.add_particles(&[Vec3::ZERO], &[]).unwrap();
    (system, ids[0])
}

// ============================================================================
// Schema
// ============================================================================

#[test]
fn test_schema_follows_field_order() {
    assert_eq!(
        Spark::SCHEMA,
        &[
            ("energy", AttributeKind::Float),
            ("rgbPP", AttributeKind::Vector),
            ("generation", AttributeKind::Int),
            ("charge", AttributeKind::Int),
        ]
    );
}

#[test]
fn test_single_field_schema() {
    assert_eq!(Temperature::SCHEMA, &[("temperature", AttributeKind::Float)]);
}

#[test]
fn test_to_values_uses_column_names() {
    let spark = Spark {
        energy: 2.5,
        color: Vec3::new(1.0, 0.5, 0.0),
        generation: 3,
        charge: -1,
    };
    let values = spark.to_values();
    assert_eq!(values[0], ("energy", AttributeValue::Float(2.5)));
    assert_eq!(values[1], ("rgbPP", AttributeValue::Vector(Vec3::new(1.0, 0.5, 0.0))));
    assert_eq!(values[2], ("generation", AttributeValue::Int(3)));
    assert_eq!(values[3], ("charge", AttributeValue::Int(-1)));
}

#[test]
fn test_from_values_reports_missing_column() {
    let lookup = |name: &str| match name {
        "temperature" => Some(AttributeValue::Float(1.0)),
        _ => None,
    };
    assert_eq!(Temperature::from_values(&lookup).unwrap(), Temperature { temperature: 1.0 });

    let err = Spark::from_values(&lookup).unwrap_err();
    assert!(matches!(err, DynamicsError::AttributeNotFound(name) if name == "energy"));
}

#[test]
fn test_from_values_reports_type_mismatch() {
    let lookup = |_: &str| Some(AttributeValue::Int(7));
    let err = Temperature::from_values(&lookup).unwrap_err();
    assert!(matches!(err, DynamicsError::AttributeTypeMismatch { .. }));
}

// ============================================================================
// Through a particle system
// ============================================================================

#[test]
fn test_declare_creates_zeroed_columns() {
    let (mut system, id) = system_with_one();
    system.declare_attributes::<Spark>().unwrap();

    assert!(system.has_attribute("energy"));
    assert!(system.has_attribute("rgbPP"));
    assert!(!system.has_attribute("color"));
    assert_eq!(system.floats("energy").unwrap(), &[0.0]);
    assert_eq!(system.vectors("rgbPP").unwrap(), &[Vec3::ZERO]);

    let back: Spark = system.read_attributes(id).unwrap();
    assert_eq!(back.generation, 0);
}

#[test]
fn test_write_then_read_bundle() {
    let (mut system, id) = system_with_one();
    system.declare_attributes::<Spark>().unwrap();

    let spark = Spark {
        energy: 4.0,
        color: Vec3::new(0.2, 0.4, 0.8),
        generation: 2,
        charge: 5,
    };
    system.write_attributes(id, &spark).unwrap();
    assert_eq!(system.read_attributes::<Spark>(id).unwrap(), spark);
    assert_eq!(system.ints("generation").unwrap(), &[2]);
}

#[test]
fn test_declaring_twice_is_idempotent() {
    let (mut system, _) = system_with_one();
    system.declare_attributes::<Temperature>().unwrap();
    system.declare_attributes::<Temperature>().unwrap();
    assert_eq!(system.attributes().declarations().len(), 1);
}

#[test]
fn test_builtin_name_is_rejected() {
    let (mut system, _) = system_with_one();
    let err = system.declare_attributes::<ClashesWithBuiltin>().unwrap_err();
    assert!(matches!(err, DynamicsError::AttributeExists(name) if name == "mass"));
}

#[test]
fn test_read_undeclared_bundle_fails() {
    let (system, id) = system_with_one();
    assert!(matches!(
        system.read_attributes::<Temperature>(id),
        Err(DynamicsError::AttributeNotFound(_))
    ));
}
