//! Property-style checks for the universal invariants the storage layer,
//! event queues, command buffers and scheduler are expected to uphold.
//!
//! Invariants that require inspecting archetype internals (column/entity
//! length parity, signature uniqueness, edge algebra) live as unit tests
//! next to `World` and `Archetype`, where that state is actually visible.
//! The invariants here are checked black-box, through the public API.

use relic_ecs::prelude::*;
use relic_ecs::schedule::Schedule;
use relic_ecs::system::AccessPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health {
    points: i32,
}

/// Invariant 1 — entity liveness monotonicity: once `is_alive` is false for
/// a handle, it never becomes true again, even after the slot is reused.
#[test]
fn liveness_never_resurrects_a_handle() {
    let mut world = World::new();
    let e = world.spawn((Position { x: 0.0, y: 0.0 },));
    assert!(world.is_alive(e));

    world.despawn(e).unwrap();
    assert!(!world.is_alive(e));

    for _ in 0..8 {
        world.spawn((Position { x: 1.0, y: 1.0 },));
    }
    assert!(!world.is_alive(e));
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick(i32);

/// Invariant 5 — an event written during frame N is observable during
/// frames N and N+1, never N+2.
#[test]
fn event_is_visible_for_exactly_two_frames() {
    let mut world = World::new();
    world.write_event(Tick(42));

    assert_eq!(
        world.event_reader::<Tick>().read().iter().cloned().collect::<Vec<_>>(),
        vec![Tick(42)]
    );
    world.update();
    assert_eq!(
        world.event_reader::<Tick>().read().iter().cloned().collect::<Vec<_>>(),
        vec![Tick(42)]
    );
    world.update();
    assert!(world.event_reader::<Tick>().read().iter().next().is_none());
}

struct RecordOrder {
    label: &'static str,
    targets: Vec<Entity>,
}
impl System for RecordOrder {
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> relic_ecs::Result<()> {
        for &e in &self.targets {
            ctx.commands().despawn(e);
        }
        Ok(())
    }
    fn name(&self) -> &str {
        self.label
    }
    fn access(&self) -> AccessPolicy {
        AccessPolicy::empty().with_commands()
    }
}

/// Invariant 6 — commands merged at a barrier preserve recording order
/// within a system, and systems merge in scheduler topological order.
#[test]
fn commands_apply_in_fifo_topological_order() {
    let mut world = World::new();
    let e1 = world.spawn((Position { x: 0.0, y: 0.0 },));
    let e2 = world.spawn((Position { x: 0.0, y: 0.0 },));
    let e3 = world.spawn((Position { x: 0.0, y: 0.0 },));
    let e4 = world.spawn((Position { x: 0.0, y: 0.0 },));

    let mut schedule = Schedule::new();
    schedule.add_system_with(
        Box::new(RecordOrder { label: "A", targets: vec![e1, e2] }),
        relic_ecs::system::SystemConfig::new().labeled("A"),
    );
    schedule.add_system_with(
        Box::new(RecordOrder { label: "B", targets: vec![e3, e4] }),
        relic_ecs::system::SystemConfig::new().labeled("B").after("A"),
    );

    let mut executor = Executor::new();
    executor.run(&mut schedule, &mut world).unwrap();

    for e in [e1, e2, e3, e4] {
        assert!(!world.is_alive(e));
    }
}

/// Invariant 7 — query completeness: the set of entities a query yields
/// equals exactly those that hold every `With` component and none of the
/// `Without` components.
#[test]
fn query_yields_exactly_the_matching_entity_set() {
    let mut world = World::new();
    let _a = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }));
    let b = world.spawn((Position { x: 1.0, y: 0.0 },));
    let _c = world.spawn((Velocity { x: 0.0, y: 1.0 },));
    let _d = world.spawn((Health { points: 5 },));

    let query = world.query::<(With<Position>, Without<Velocity>, EntityFetch)>();
    let matched: Vec<Entity> = query.iter().map(|(_, _, e)| e).collect();

    assert_eq!(matched, vec![b]);
}

/// Invariant 8 — functional laws on query iteration: filter/collect,
/// map/collect and double-reverse all commute with the plain collect.
#[test]
fn query_iterator_adapters_obey_functional_laws() {
    let mut world = World::new();
    for i in 0..12 {
        world.spawn((Health { points: i * 3 },));
    }

    let query = world.query::<&Health>();
    let all: Vec<i32> = query.iter().map(|h| h.points).collect();

    let filter_then_collect: Vec<i32> = all.iter().copied().filter(|&p| p >= 15).collect();
    let collect_then_filter: Vec<i32> =
        all.iter().copied().collect::<Vec<_>>().into_iter().filter(|&p| p >= 15).collect();
    assert_eq!(filter_then_collect, collect_then_filter);

    let map_then_collect: Vec<i32> = all.iter().copied().map(|p| p * 2).collect();
    let collect_then_map: Vec<i32> =
        all.iter().copied().collect::<Vec<_>>().into_iter().map(|p| p * 2).collect();
    assert_eq!(map_then_collect, collect_then_map);

    let double_reversed: Vec<i32> = all.iter().copied().rev().rev().collect();
    assert_eq!(double_reversed, all);
}

struct MoveSystem;
impl System for MoveSystem {
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> relic_ecs::Result<()> {
        let mut query = ctx.world_mut().query_mut::<&mut Position>();
        for pos in query.iter_mut() {
            pos.x += 1.0;
        }
        Ok(())
    }
    fn name(&self) -> &str {
        "MoveSystem"
    }
    fn access(&self) -> AccessPolicy {
        AccessPolicy::empty().writes_component::<Position>()
    }
}
struct HealthSystem;
impl System for HealthSystem {
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> relic_ecs::Result<()> {
        let mut query = ctx.world_mut().query_mut::<&mut Health>();
        for h in query.iter_mut() {
            h.points -= 1;
        }
        Ok(())
    }
    fn name(&self) -> &str {
        "HealthSystem"
    }
    fn access(&self) -> AccessPolicy {
        AccessPolicy::empty().writes_component::<Health>()
    }
}

/// Invariant 9 — scheduler safety: systems with disjoint write-sets (and no
/// write overlapping another's read-set) land in the same stage and run
/// concurrently; the schedule never needs to serialize them.
#[test]
fn disjoint_access_systems_share_a_stage() {
    let mut world = World::new();
    world.spawn((Position { x: 0.0, y: 0.0 }, Health { points: 10 }));

    let mut schedule = Schedule::new();
    schedule.add_system(Box::new(MoveSystem));
    schedule.add_system(Box::new(HealthSystem));

    let mut executor = Executor::new();
    executor.run(&mut schedule, &mut world).unwrap();

    assert_eq!(schedule.stage_count(), 1);
    assert_eq!(schedule.system_count(), 2);
}

/// Invariant 10 — destroying an entity strictly increments the generation
/// stored at its slot, whenever that slot is reused.
#[test]
fn destroy_strictly_increments_generation() {
    let mut world = World::new();
    let e1 = world.spawn((Position { x: 0.0, y: 0.0 },));
    let gen1 = e1.generation();
    world.despawn(e1).unwrap();

    let e2 = world.spawn((Position { x: 0.0, y: 0.0 },));
    if e2.index() == e1.index() {
        assert!(e2.generation() > gen1);
    }
    assert!(!world.is_alive(e1));
}
