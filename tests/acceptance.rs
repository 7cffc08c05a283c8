//! End-to-end coverage for the six concrete scenarios this runtime is built against: archetype
//! signature stability, structural migration, deferred destruction, wave scheduling, chunk-parallel
//! determinism, and write-write conflict detection.
use std::sync::Arc;

use strata_ecs::prelude::*;

struct Position;
struct Velocity;

fn position_schema() -> Schema {
    Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)])
}

// S1: two worlds register the same three component types in different orders, then build
// structurally identical entities. The resulting archetype key and the world hash must agree
// regardless of registration order.
#[test]
fn s1_archetype_signature_is_independent_of_registration_order() {
    struct A;
    struct B;
    struct C;

    fn schema() -> Schema {
        Schema::new(vec![("v", ScalarKind::I32)])
    }

    let mut w1 = World::new();
    let a1 = w1.register_component_with_schema::<A>("A", schema()).unwrap();
    let b1 = w1.register_component_with_schema::<B>("B", schema()).unwrap();
    let c1 = w1.register_component_with_schema::<C>("C", schema()).unwrap();
    let e1 = w1.create_entity(true);
    w1.flush();
    w1.add_component(e1, a1, ComponentValues::new().with("v", Scalar::I32(1)));
    w1.add_component(e1, b1, ComponentValues::new().with("v", Scalar::I32(2)));
    w1.add_component(e1, c1, ComponentValues::new().with("v", Scalar::I32(3)));
    w1.flush();

    let mut w2 = World::new();
    let c2 = w2.register_component_with_schema::<C>("C", schema()).unwrap();
    let a2 = w2.register_component_with_schema::<A>("A", schema()).unwrap();
    let b2 = w2.register_component_with_schema::<B>("B", schema()).unwrap();
    let e2 = w2.create_entity(true);
    w2.flush();
    w2.add_component(e2, c2, ComponentValues::new().with("v", Scalar::I32(3)));
    w2.add_component(e2, a2, ComponentValues::new().with("v", Scalar::I32(1)));
    w2.add_component(e2, b2, ComponentValues::new().with("v", Scalar::I32(2)));
    w2.flush();

    let mut k1 = w1.archetype_of(e1).unwrap().type_ids().to_vec();
    let mut k2 = w2.archetype_of(e2).unwrap().type_ids().to_vec();
    k1.sort_unstable();
    k2.sort_unstable();
    assert_eq!(k1, k2);
    assert_eq!(hash_world(&w1, None), hash_world(&w2, None));
}

// S2: create an entity, add Position, read it back, add Velocity, read both back, remove
// Position, and confirm Velocity survives the migration while Position is gone.
#[test]
fn s2_archetype_migration_preserves_untouched_components() {
    let mut world = World::new();
    let position = world.register_component_with_schema::<Position>("Position", position_schema()).unwrap();
    let velocity = world
        .register_component_with_schema::<Velocity>("Velocity", Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]))
        .unwrap();

    let e = world.create_entity(true);
    world.flush();

    world.add_component(e, position, ComponentValues::new().with("x", Scalar::F32(1.0)).with("y", Scalar::F32(2.0)));
    world.flush();
    assert!(world.has_component(e, position));
    assert_eq!(world.get_component(e, position).unwrap().get("x"), Some(Scalar::F32(1.0)));

    world.add_component(e, velocity, ComponentValues::new().with("x", Scalar::F32(0.5)).with("y", Scalar::F32(-0.5)));
    world.flush();
    assert!(world.has_component(e, position));
    assert!(world.has_component(e, velocity));
    assert_eq!(world.get_component(e, position).unwrap().get("y"), Some(Scalar::F32(2.0)));
    assert_eq!(world.get_component(e, velocity).unwrap().get("x"), Some(Scalar::F32(0.5)));

    world.remove_component(e, position);
    world.flush();
    assert!(!world.has_component(e, position));
    assert!(world.has_component(e, velocity));
    assert_eq!(world.get_component(e, velocity).unwrap().get("y"), Some(Scalar::F32(-0.5)));
}

// S3: destroying an entity only takes effect at the next flush, and a slot reused afterward
// never compares equal to the stale handle.
#[test]
fn s3_destroy_is_deferred_until_flush_and_reused_slots_bump_generation() {
    let mut world = World::new();
    let e = world.create_entity(true);
    world.flush();
    assert!(world.is_alive(e));

    world.destroy_entity(e);
    assert!(world.is_alive(e), "destroy must not take effect before flush");

    world.flush();
    assert!(!world.is_alive(e));

    let e2 = world.create_entity(true);
    world.flush();
    assert_eq!(e.index(), e2.index(), "the freed slot should be reused");
    assert_ne!(e, e2, "a reused slot must carry a higher generation than any stale handle");
    assert!(!world.is_alive(e));
    assert!(world.is_alive(e2));
}

// S4: four systems, A and B independent, C depending on A and D depending on B. The planner must
// produce exactly two waves: {A, B} then {C, D}.
#[test]
fn s4_wave_plan_groups_independent_systems_and_respects_explicit_ordering() {
    let a = SystemMetadata::new(1, "A").writes(10);
    let b = SystemMetadata::new(2, "B").writes(20);
    let c = SystemMetadata::new(3, "C").reads(10).depends_on(1);
    let d = SystemMetadata::new(4, "D").reads(20).depends_on(2);
    let systems = vec![a, b, c, d];

    let plan = WavePlanner::plan(&systems);
    plan.validate(&systems).unwrap();

    assert_eq!(plan.waves.len(), 2);
    let mut w0 = plan.waves[0].clone();
    w0.sort_unstable();
    let mut w1 = plan.waves[1].clone();
    w1.sort_unstable();
    assert_eq!(w0, vec![1, 2]);
    assert_eq!(w1, vec![3, 4]);
}

// S6: two systems both writing Position must land in separate waves, with the pair reported as a
// write-write conflict.
#[test]
fn s6_write_write_conflict_forces_two_waves_and_is_reported() {
    let first = SystemMetadata::new(1, "first").writes(10).priority(1);
    let second = SystemMetadata::new(2, "second").writes(10).priority(0);
    let systems = vec![first, second];

    let plan = WavePlanner::plan(&systems);
    assert_eq!(plan.waves.len(), 2);
    assert_eq!(plan.conflicts, vec![(1, 2)]);
    plan.validate(&systems).unwrap();
}

fn move2d_kernel(velocity: ComponentTypeId) -> Kernel {
    Arc::new(move |chunk: &mut KernelChunk, _params: &ComponentValues| {
        for row in 0..chunk.len() {
            let (Some(Scalar::F32(x)), Some(Scalar::F32(y))) = (chunk.write_scalar("x", row), chunk.write_scalar("y", row)) else {
                continue;
            };
            let vx = chunk.read_scalar(velocity, "x", row).map(|s| s.as_f64() as f32).unwrap_or(0.0);
            let vy = chunk.read_scalar(velocity, "y", row).map(|s| s.as_f64() as f32).unwrap_or(0.0);
            chunk.set_write_scalar("x", row, Scalar::F32(x + vx));
            chunk.set_write_scalar("y", row, Scalar::F32(y + vy));
        }
        Ok(vec![chunk.write_type()])
    })
}

fn build_seeded_world(seed: u64, n: usize) -> (World, ComponentTypeId) {
    let mut world = World::new();
    world.insert_resource(Xorshift128PlusPrng::new(seed));
    let position = world.register_component_with_schema::<Position>("Position", position_schema()).unwrap();
    let velocity = world
        .register_component_with_schema::<Velocity>("Velocity", Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)]))
        .unwrap();

    for _ in 0..n {
        let e = world.create_entity(true);
        world.flush();
        let (x, y, vx, vy) = {
            let mut prng = world.resource_mut::<Xorshift128PlusPrng>().unwrap();
            (
                (prng.next_f64() * 100.0) as f32,
                (prng.next_f64() * 100.0) as f32,
                (prng.next_f64() * 2.0 - 1.0) as f32,
                (prng.next_f64() * 2.0 - 1.0) as f32,
            )
        };
        world.add_component(e, position, ComponentValues::new().with("x", Scalar::F32(x)).with("y", Scalar::F32(y)));
        world.add_component(e, velocity, ComponentValues::new().with("x", Scalar::F32(vx)).with("y", Scalar::F32(vy)));
        world.flush();
    }
    (world, position)
}

// S5: 1000 entities with PRNG-seeded positions and velocities, advanced one tick by a
// chunk-parallel `move2d` kernel. Two independently constructed worlds seeded identically must
// hash identically afterward, and the host (non-shared-memory) and shared-memory dispatch paths
// must agree on the result.
#[test]
fn s5_chunk_parallel_movement_is_deterministic_across_seeds_and_dispatch_paths() {
    const SEED: u64 = 1234567;
    const N: usize = 1000;

    let (mut world_shared, position_shared) = build_seeded_world(SEED, N);
    let velocity_shared = world_shared.registry().type_id_by_name("Velocity").unwrap();
    let mut registry = KernelRegistry::new();
    registry.register(KernelMetadata::new("move2d", position_shared, vec![velocity_shared]), move2d_kernel(velocity_shared)).unwrap();

    let report = ChunkDispatcher::new(&mut world_shared, true)
        .for_each_chunk_parallel(&registry, "move2d", &ComponentValues::new(), DEFAULT_CHUNK_SIZE)
        .unwrap();
    assert_eq!(report.entities_touched, N);

    let (mut world_host, position_host) = build_seeded_world(SEED, N);
    let velocity_host = world_host.registry().type_id_by_name("Velocity").unwrap();
    let mut registry_host = KernelRegistry::new();
    registry_host.register(KernelMetadata::new("move2d", position_host, vec![velocity_host]), move2d_kernel(velocity_host)).unwrap();
    ChunkDispatcher::new(&mut world_host, false)
        .for_each_chunk_parallel(&registry_host, "move2d", &ComponentValues::new(), DEFAULT_CHUNK_SIZE)
        .unwrap();

    assert_eq!(hash_world(&world_shared, None), hash_world(&world_host, None));

    // A third, independently-seeded world run the same way must reproduce the same hash too.
    let (mut world_repeat, position_repeat) = build_seeded_world(SEED, N);
    let velocity_repeat = world_repeat.registry().type_id_by_name("Velocity").unwrap();
    let mut registry_repeat = KernelRegistry::new();
    registry_repeat
        .register(KernelMetadata::new("move2d", position_repeat, vec![velocity_repeat]), move2d_kernel(velocity_repeat))
        .unwrap();
    ChunkDispatcher::new(&mut world_repeat, true)
        .for_each_chunk_parallel(&registry_repeat, "move2d", &ComponentValues::new(), DEFAULT_CHUNK_SIZE)
        .unwrap();
    assert_eq!(hash_world(&world_shared, None), hash_world(&world_repeat, None));
}
