//! Checkpoint files written and restored through a `Scene`.

use dynfx::prelude::*;
use dynfx::cache;

fn sparks() -> (Scene, SystemId) {
    let mut scene = Scene::new(DynGlobals::new(24.0).with_over_samples(2)).unwrap();
    let sparks = scene
        .create_system(
            "sparks",
            SystemConfig::new().with_lifespan(LifespanMode::RandomRange { mean: 1.0, spread: 0.5, seed: 3 }),
        )
        .unwrap();
    scene
        .system_mut(sparks)
        .unwrap()
        .declare_attribute("temperature", AttributeKind::Float, Some(AttributeValue::Float(900.0)))
        .unwrap();
    let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8)).unwrap();
    let burst = scene
        .create_emitter("burst", EmitterConfig::omni(60.0).with_speed(3.0).with_seed(7))
        .unwrap();
    scene.connect_field(gravity, sparks).unwrap();
    scene.connect_emitter(burst, sparks).unwrap();
    (scene, sparks)
}

#[test]
fn test_binary_checkpoint_restores_identical_state() {
    let dir = tempfile::tempdir().unwrap();
    let (mut scene, id) = sparks();
    scene.advance_to(15, &AbortHandle::new()).unwrap();

    let written = scene.write_checkpoints(dir.path(), false).unwrap();
    assert_eq!(written, vec![dir.path().join("sparks.15.pdc")]);

    let (mut fresh, fresh_id) = sparks();
    assert_eq!(fresh.system(fresh_id).unwrap().len(), 0);
    fresh.restore_checkpoint(fresh_id, &written[0]).unwrap();

    let original = scene.system(id).unwrap();
    let restored = fresh.system(fresh_id).unwrap();
    assert!(!original.is_empty());
    assert_eq!(restored.data(), original.data());
    assert_eq!(restored.floats("temperature").unwrap()[0], 900.0);
}

#[test]
fn test_restored_checkpoint_keeps_id_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let (mut scene, id) = sparks();
    scene.advance_to(6, &AbortHandle::new()).unwrap();
    let path = scene.write_checkpoints(dir.path(), false).unwrap().remove(0);

    let (mut fresh, fresh_id) = sparks();
    fresh.restore_checkpoint(fresh_id, &path).unwrap();
    let next = fresh
        .system_mut(fresh_id)
        .unwrap()
        .add_particles(&[Vec3::ZERO], &[])
        .unwrap()[0];
    let highest = scene.system(id).unwrap().ids().iter().map(|p| p.0).max().unwrap();
    assert!(next.0 > highest);
}

#[test]
fn test_ascii_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (mut scene, id) = sparks();
    scene.advance_to(10, &AbortHandle::new()).unwrap();

    let path = scene.write_checkpoints(dir.path(), true).unwrap().remove(0);
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

    let (mut fresh, fresh_id) = sparks();
    fresh.restore_checkpoint(fresh_id, &path).unwrap();

    let original = scene.system(id).unwrap();
    let restored = fresh.system(fresh_id).unwrap();
    assert_eq!(restored.ids(), original.ids());
    for (a, b) in restored.positions().iter().zip(original.positions()) {
        assert!((*a - *b).length() < 1e-6);
    }
    assert_eq!(restored.floats("temperature").unwrap(), original.floats("temperature").unwrap());
}

#[test]
fn test_ascii_writes_null_for_infinite_lifespan() {
    let dir = tempfile::tempdir().unwrap();
    let mut scene = Scene::new(DynGlobals::default()).unwrap();
    scene
        .create_system("seeds", SystemConfig::new().with_particle(Vec3::ONE, Vec3::ZERO))
        .unwrap();
    let path = scene.write_checkpoints(dir.path(), true).unwrap().remove(0);

    let text = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["system"], "seeds");
    assert!(json["particles"][0]["lifespan"].is_null());
}

#[test]
fn test_truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut scene, _) = sparks();
    scene.advance_to(5, &AbortHandle::new()).unwrap();
    let path = scene.write_checkpoints(dir.path(), false).unwrap().remove(0);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        cache::read_checkpoint(&path),
        Err(DynamicsError::CheckpointFormat(_))
    ));
}
