//! End-to-end scenarios run through a `Scene`.

use dynfx::prelude::*;
use dynfx::field::Field;
use dynfx::particle::ParticleId;

fn scene_at(fps: f32) -> Scene {
    let _ = env_logger::builder().is_test(true).try_init();
    Scene::new(DynGlobals::new(fps)).unwrap()
}

// ============================================================================
// Fields
// ============================================================================

#[test]
fn test_unbounded_field_ignores_max_distance() {
    let point = Vec3::new(30.0, -4.0, 12.0);
    let unlimited = Field::new("a", FieldConfig::radial(3.0).with_attenuation(2.0));
    let switched_off = Field::new(
        "b",
        FieldConfig {
            use_max_distance: false,
            ..FieldConfig::radial(3.0).with_attenuation(2.0).with_max_distance(1.0)
        },
    );
    let reference = unlimited.evaluate(point, Vec3::ZERO, 1.0, 0.0);
    assert!(reference.length() > 0.0);
    assert_eq!(switched_off.evaluate(point, Vec3::ZERO, 1.0, 0.0), reference);
}

#[test]
fn test_gravity_one_second_step() {
    let mut scene = scene_at(1.0);
    let drops = scene
        .create_system("drops", SystemConfig::new().with_particle(Vec3::ZERO, Vec3::ZERO))
        .unwrap();
    let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8)).unwrap();
    scene.connect_field(gravity, drops).unwrap();

    scene.step().unwrap();
    let v = scene.system(drops).unwrap().velocities()[0];
    assert!((v - Vec3::new(0.0, -9.8, 0.0)).length() < 1e-4);
}

#[test]
fn test_full_conserve_keeps_velocity() {
    let mut scene = scene_at(24.0);
    let velocity = Vec3::new(1.5, -0.25, 3.0);
    let drift = scene
        .create_system("drift", SystemConfig::new().with_conserve(1.0).with_particle(Vec3::ZERO, velocity))
        .unwrap();

    for _ in 0..48 {
        scene.step().unwrap();
        assert_eq!(scene.system(drift).unwrap().velocities()[0], velocity);
    }
}

#[test]
fn test_partial_conserve_decays_velocity() {
    let mut scene = scene_at(24.0);
    let drift = scene
        .create_system("drift", SystemConfig::new().with_conserve(0.5).with_particle(Vec3::ZERO, Vec3::X))
        .unwrap();
    scene.step().unwrap();
    scene.step().unwrap();
    let v = scene.system(drift).unwrap().velocities()[0];
    assert!((v.x - 0.25).abs() < 1e-6);
}

// ============================================================================
// Collisions
// ============================================================================

fn bounce(resilience: f32, friction: f32) -> (Vec3, u32) {
    let mut scene = scene_at(2.0);
    let balls = scene
        .create_system(
            "balls",
            SystemConfig::new().with_particle(Vec3::new(0.0, 1.0, 0.0), Vec3::new(2.0, -4.0, 0.0)),
        )
        .unwrap();
    let floor = scene
        .create_collision(
            "floor",
            CollisionConfig::ground(0.0)
                .with_resilience(resilience)
                .with_friction(friction),
        )
        .unwrap();
    scene.connect_collision(floor, balls).unwrap();
    scene.step().unwrap();

    let system = scene.system(balls).unwrap();
    (system.velocities()[0], system.collision_counts()[0])
}

#[test]
fn test_elastic_collision_reflects_normal_speed() {
    let (v, hits) = bounce(1.0, 0.0);
    assert_eq!(hits, 1);
    assert!((v.y - 4.0).abs() < 1e-6);
    assert!((v.x - 2.0).abs() < 1e-6);
}

#[test]
fn test_zero_resilience_removes_normal_velocity() {
    let (v, hits) = bounce(0.0, 0.0);
    assert_eq!(hits, 1);
    assert_eq!(v.y, 0.0);
    assert!((v.x - 2.0).abs() < 1e-6);
}

#[test]
fn test_friction_scales_tangential_velocity() {
    let (v, _) = bounce(1.0, 0.25);
    assert!((v.x - 1.5).abs() < 1e-6);
}

// ============================================================================
// Springs
// ============================================================================

#[test]
fn test_spring_restoring_force_scenario() {
    let mut scene = scene_at(24.0);
    let knots = scene
        .create_system("knots", SystemConfig::new().with_particle(Vec3::ZERO, Vec3::ZERO))
        .unwrap();
    let net = scene.create_network("rope", SpringConfig::new(1.0).with_rest_length(5.0)).unwrap();
    let added = scene
        .add_spring(
            net,
            SpringEnd::Particle {
                system: knots,
                id: ParticleId(0),
            },
            SpringEnd::Fixed(Vec3::new(10.0, 0.0, 0.0)),
            None,
        )
        .unwrap();
    assert!(added);

    let force = scene.spring_forces()[&(knots, ParticleId(0))];
    assert!((force.length() - 5.0).abs() < 1e-5);
    assert!(force.x > 0.0);
}

// ============================================================================
// Emitters
// ============================================================================

#[test]
fn test_emitter_rate_averages_one_per_step() {
    let mut scene = scene_at(10.0);
    let spray = scene.create_system("spray", SystemConfig::new()).unwrap();
    let nozzle = scene.create_emitter("nozzle", EmitterConfig::omni(10.0)).unwrap();
    scene.connect_emitter(nozzle, spray).unwrap();

    let mut emitted = 0;
    for _ in 0..200 {
        emitted += scene.step().unwrap().emitted;
    }
    let per_step = emitted as f32 / 200.0;
    assert!((per_step - 1.0).abs() < 0.05, "{} per step", per_step);
    assert_eq!(scene.system(spray).unwrap().len(), emitted);
}

#[test]
fn test_emitter_waits_for_start_frame() {
    let mut scene = scene_at(10.0);
    let spray = scene
        .create_system("spray", SystemConfig::new().with_start_frame(11))
        .unwrap();
    let nozzle = scene.create_emitter("nozzle", EmitterConfig::omni(10.0)).unwrap();
    scene.connect_emitter(nozzle, spray).unwrap();

    scene.advance_to(11, &AbortHandle::new()).unwrap();
    assert_eq!(scene.system(spray).unwrap().len(), 0);
    scene.step().unwrap();
    assert!(scene.system(spray).unwrap().len() > 0);
}

// ============================================================================
// Cache and runup
// ============================================================================

fn fountain() -> (Scene, SystemId) {
    let mut scene = scene_at(24.0);
    let water = scene
        .create_system(
            "water",
            SystemConfig::new().with_lifespan(LifespanMode::Constant { seconds: 0.5 }),
        )
        .unwrap();
    let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8)).unwrap();
    let nozzle = scene
        .create_emitter("nozzle", EmitterConfig::directional(Vec3::Y, 120.0).with_spread(0.1).with_speed(5.0))
        .unwrap();
    let floor = scene
        .create_collision("floor", CollisionConfig::ground(0.0).with_resilience(0.5))
        .unwrap();
    scene.connect_field(gravity, water).unwrap();
    scene.connect_emitter(nozzle, water).unwrap();
    scene.connect_collision(floor, water).unwrap();
    (scene, water)
}

#[test]
fn test_scrubbing_back_reproduces_cached_frames() {
    let (mut scene, water) = fountain();
    let abort = AbortHandle::new();

    scene.advance_to(12, &abort).unwrap();
    let at_12 = scene.system(water).unwrap().data().clone();
    scene.advance_to(30, &abort).unwrap();
    scene.advance_to(12, &abort).unwrap();

    assert_eq!(scene.frame(), 12);
    assert_eq!(scene.system(water).unwrap().data(), &at_12);
}

#[test]
fn test_runup_is_deterministic() {
    let (mut first, water) = fountain();
    let (mut second, _) = fountain();
    first.advance_to(40, &AbortHandle::new()).unwrap();
    for _ in 0..39 {
        second.step().unwrap();
    }
    assert_eq!(first.frame(), second.frame());
    assert_eq!(first.system(water).unwrap().data(), second.system(water).unwrap().data());
}

#[test]
fn test_truncate_twice_matches_once() {
    let (mut scene, water) = fountain();
    scene.advance_to(20, &AbortHandle::new()).unwrap();

    scene.truncate_caches(10);
    let once: Vec<i64> = scene.cache(water).unwrap().frames().collect();
    scene.truncate_caches(10);
    let twice: Vec<i64> = scene.cache(water).unwrap().frames().collect();

    assert_eq!(once, twice);
    assert_eq!(once.last(), Some(&10));
}

#[test]
fn test_uncached_system_still_simulates() {
    let mut scene = scene_at(24.0);
    let drops = scene
        .create_system(
            "drops",
            SystemConfig::new()
                .without_cache()
                .with_particle(Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO),
        )
        .unwrap();
    let gravity = scene.create_field("gravity", FieldConfig::gravity(9.8)).unwrap();
    scene.connect_field(gravity, drops).unwrap();

    scene.advance_to(10, &AbortHandle::new()).unwrap();
    assert!(scene.cache(drops).unwrap().is_empty());
    let y = scene.system(drops).unwrap().positions()[0].y;
    assert!(y < 2.0);

    // Going back resimulates from the start state.
    scene.advance_to(5, &AbortHandle::new()).unwrap();
    assert_eq!(scene.frame(), 5);
    assert!(scene.system(drops).unwrap().positions()[0].y > y);
}

#[test]
fn test_aborted_runup_stops_between_frames() {
    let (mut scene, _) = fountain();
    let abort = AbortHandle::new();
    abort.abort();
    let err = scene.advance_to(10, &abort).unwrap_err();
    assert!(matches!(err, DynamicsError::Aborted { frame: 2 }));
    assert_eq!(scene.frame(), 1);

    abort.reset();
    scene.advance_to(10, &abort).unwrap();
    assert_eq!(scene.frame(), 10);
}

// ============================================================================
// Springs across rewinds
// ============================================================================

/// Two beads on a tether; the lower one dies when it first hits the floor.
fn tethered() -> (Scene, SystemId) {
    let mut scene = scene_at(24.0);
    let beads = scene
        .create_system(
            "beads",
            SystemConfig::new()
                .with_particle(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, -5.0, 0.0))
                .with_particle(Vec3::new(2.0, 5.0, 0.0), Vec3::ZERO)
                .with_event(EventConfig::die_on("pop", 1)),
        )
        .unwrap();
    let floor = scene.create_collision("floor", CollisionConfig::ground(0.0)).unwrap();
    scene.connect_collision(floor, beads).unwrap();
    let tether = scene
        .create_network("tether", SpringConfig::new(1.0).with_rest_length(1.0))
        .unwrap();
    scene.connect_springs_chain(tether, beads).unwrap();
    (scene, beads)
}

#[test]
fn test_resimulating_after_spring_end_died_matches_first_run() {
    let abort = AbortHandle::new();
    let (mut fresh, beads) = tethered();
    fresh.advance_to(10, &abort).unwrap();
    let expected = fresh.system(beads).unwrap().positions().to_vec();
    assert_eq!(expected.len(), 1);

    let (mut scene, _) = tethered();
    scene.advance_to(10, &abort).unwrap();
    scene.truncate_caches(2);
    scene.advance_to(2, &abort).unwrap();
    scene.advance_to(10, &abort).unwrap();

    assert_eq!(scene.system(beads).unwrap().positions(), expected.as_slice());
}

#[test]
fn test_reset_after_spring_end_died_matches_first_run() {
    let abort = AbortHandle::new();
    let (mut scene, beads) = tethered();
    scene.advance_to(10, &abort).unwrap();
    let first_run = scene.system(beads).unwrap().data().clone();

    scene.clear_caches();
    scene.reset().unwrap();
    assert_eq!(scene.system(beads).unwrap().len(), 2);
    scene.advance_to(10, &abort).unwrap();

    assert_eq!(scene.system(beads).unwrap().data(), &first_run);
}
