// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `World`: the aggregate of entities, archetypes, resources, and events,
//! plus the structural operations (spawn/despawn/add/remove component) that
//! move entities between archetypes.

use std::any::{Any, TypeId};

use ahash::AHashMap;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{Archetype, ArchetypeSignature};
use crate::command::WorldCmdBuffer;
use crate::component::{Bundle, Component};
use crate::entity::{Entity, EntityAllocator, EntityLocation};
use crate::error::{EcsError, Result};
use crate::event::{EventReader, EventRegistry, EventWriter};
use crate::query::{Query, QueryFetch, QueryFetchMut, QueryFilter, QueryMut, QuerySignature};
use crate::resource::ResourceRegistry;

/// Spawning more than this many entities in one `spawn_batch` call is
/// treated as a misuse/DoS signal rather than honored.
const MAX_BATCH_SPAWN: usize = 10_000_000;

pub struct World {
    entities: EntityAllocator,
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<ArchetypeSignature, usize>,
    resources: ResourceRegistry,
    events: EventRegistry,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let mut world = Self {
            entities: EntityAllocator::new(),
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            resources: ResourceRegistry::new(),
            events: EventRegistry::new(),
        };
        // The empty archetype always lives at index 0.
        let empty_sig = ArchetypeSignature::new();
        world.archetypes.push(Archetype::new(empty_sig.clone()));
        world.archetype_index.insert(empty_sig, 0);
        world
    }

    // ---- entities -------------------------------------------------------

    /// Spawn immediately: the entity is live and located as soon as this
    /// returns.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world_spawn").entered();

        let entity = self.entities.create();
        let archetype_id = self.get_or_create_archetype::<B>();
        let archetype = &mut self.archetypes[archetype_id];
        let row = archetype.allocate_row(entity);

        let mut ptrs: smallvec::SmallVec<[*mut u8; crate::component::MAX_BUNDLE_COMPONENTS]> =
            smallvec::SmallVec::new();
        for type_id in B::type_ids() {
            let idx = archetype.column_index(type_id).expect("column registered above");
            let column = archetype.get_column_mut_by_index(idx).unwrap();
            ptrs.push(column.get_ptr_mut(row));
        }
        unsafe { bundle.write_components(&ptrs) };

        self.entities
            .set_location(entity, EntityLocation { archetype_id, archetype_row: row });
        entity
    }

    /// Reserve an entity handle lock-free, without locking the allocator.
    /// Not materialized (no archetype row, not yet visible to queries)
    /// until the next [`World::update`].
    pub fn reserve_entity(&self) -> Entity {
        self.entities.reserve()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_live(entity)
    }

    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        let location = self
            .entities
            .location(entity)
            .ok_or(EcsError::EntityNotFound)?;

        let moved = unsafe { self.archetypes[location.archetype_id].remove_row(location.archetype_row) };
        self.entities.destroy(entity)?;

        if let Some(moved_entity) = moved {
            self.entities.set_location(
                moved_entity,
                EntityLocation {
                    archetype_id: location.archetype_id,
                    archetype_row: location.archetype_row,
                },
            );
        }
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // ---- components -------------------------------------------------------

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.entities
            .location(entity)
            .is_some_and(|loc| self.archetypes[loc.archetype_id].has_component(TypeId::of::<T>()))
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let loc = self.entities.location(entity)?;
        self.archetypes[loc.archetype_id]
            .get_column(TypeId::of::<T>())?
            .get::<T>(loc.archetype_row)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let loc = self.entities.location(entity)?;
        self.archetypes[loc.archetype_id]
            .get_column_mut(TypeId::of::<T>())?
            .get_mut::<T>(loc.archetype_row)
    }

    /// Move `entity` into the archetype reached by adding component `T`,
    /// using (and populating) the source archetype's add-edge cache.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        let loc = self.entities.location(entity).ok_or(EcsError::EntityNotFound)?;
        let type_id = TypeId::of::<T>();
        if self.archetypes[loc.archetype_id].has_component(type_id) {
            // Already present: overwrite in place, no structural move.
            *self.archetypes[loc.archetype_id]
                .get_column_mut(type_id)
                .unwrap()
                .get_mut::<T>(loc.archetype_row)
                .unwrap() = component;
            return Ok(());
        }

        let dst_id = self.edge_destination(loc.archetype_id, type_id, true);
        let new_row = self.move_entity(entity, loc, dst_id)?;
        let dst = &mut self.archetypes[dst_id];
        if dst.column_index(type_id).is_none() {
            dst.register_component::<T>();
        }
        let idx = dst.column_index(type_id).unwrap();
        let ptr = dst.get_column_mut_by_index(idx).unwrap().get_ptr_mut(new_row) as *mut T;
        unsafe { ptr.write(component) };
        Ok(())
    }

    /// Move `entity` into the archetype reached by removing component `T`,
    /// returning the removed value.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<T> {
        let loc = self.entities.location(entity).ok_or(EcsError::EntityNotFound)?;
        let type_id = TypeId::of::<T>();
        if !self.archetypes[loc.archetype_id].has_component(type_id) {
            return Err(EcsError::ComponentNotFound);
        }

        let value = self.archetypes[loc.archetype_id]
            .get_column(type_id)
            .unwrap()
            .get::<T>(loc.archetype_row)
            .map(|v: &T| unsafe { std::ptr::read(v as *const T) })
            .unwrap();

        let dst_id = self.edge_destination(loc.archetype_id, type_id, false);
        self.move_entity(entity, loc, dst_id)?;
        Ok(value)
    }

    fn edge_destination(&mut self, src_id: usize, type_id: TypeId, adding: bool) -> usize {
        let cached = if adding {
            self.archetypes[src_id].get_add_edge(type_id)
        } else {
            self.archetypes[src_id].get_remove_edge(type_id)
        };
        if let Some(dst) = cached {
            return dst;
        }

        let mut signature = self.archetypes[src_id].signature().clone();
        if adding {
            signature.push(type_id);
            signature.sort();
            signature.dedup();
        } else {
            signature.retain(|t| *t != type_id);
        }

        let dst_id = self.get_or_create_archetype_with_signature(signature);
        if adding {
            self.archetypes[src_id].set_add_edge(type_id, dst_id);
            self.archetypes[dst_id].set_remove_edge(type_id, src_id);
        } else {
            self.archetypes[src_id].set_remove_edge(type_id, dst_id);
            self.archetypes[dst_id].set_add_edge(type_id, src_id);
        }
        dst_id
    }

    /// Move the row at `loc` into archetype `dst_id`, copying every shared
    /// component column, updating both the moved entity's and any
    /// swap-displaced entity's location. The component(s) being added or
    /// removed are the caller's responsibility to populate/consume.
    fn move_entity(&mut self, entity: Entity, loc: EntityLocation, dst_id: usize) -> Result<usize> {
        let src_id = loc.archetype_id;
        let (src, dst): (&mut Archetype, &mut Archetype) = if src_id < dst_id {
            let (left, right) = self.archetypes.split_at_mut(dst_id);
            (&mut left[src_id], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(src_id);
            (&mut right[0], &mut left[dst_id])
        };

        let new_row = dst.allocate_row(entity);
        for type_id in src.signature().clone() {
            if dst.column_index(type_id).is_none() {
                if !dst.signature().contains(&type_id) {
                    // Not part of the destination archetype at all (the
                    // component being removed) — nothing to carry over.
                    continue;
                }
                let empty = src.get_column(type_id).unwrap().clone_empty();
                dst.add_column_raw(type_id, empty);
            }
            let dst_idx = dst.column_index(type_id).unwrap();
            let size = src.get_column(type_id).unwrap().get_item_size();
            let src_ptr = src.get_column_mut(type_id).unwrap().get_ptr_mut(loc.archetype_row);
            let dst_ptr = dst.get_column_mut_by_index(dst_idx).unwrap().get_ptr_mut(new_row);
            unsafe { std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, size) };
        }

        // Every shared component byte was bitwise-copied into `dst` above,
        // so the vacated src row must not run component destructors —
        // `forget_row`, not `remove_row`.
        let moved = unsafe { src.forget_row(loc.archetype_row) };
        self.entities.set_location(
            entity,
            EntityLocation { archetype_id: dst_id, archetype_row: new_row },
        );
        if let Some(moved_entity) = moved {
            self.entities.set_location(
                moved_entity,
                EntityLocation { archetype_id: loc.archetype_id, archetype_row: loc.archetype_row },
            );
        }
        Ok(new_row)
    }

    // ---- archetypes -------------------------------------------------------

    fn get_or_create_archetype<B: Bundle>(&mut self) -> usize {
        let mut signature: ArchetypeSignature = B::type_ids().into_iter().collect();
        signature.sort();
        signature.dedup();
        let id = self.get_or_create_archetype_with_signature(signature);
        B::register_components(&mut self.archetypes[id]);
        self.archetypes[id].mark_columns_initialized();
        id
    }

    fn get_or_create_archetype_with_signature(&mut self, signature: ArchetypeSignature) -> usize {
        if let Some(&id) = self.archetype_index.get(&signature) {
            return id;
        }
        let id = self.archetypes.len();
        self.archetype_index.insert(signature.clone(), id);
        self.archetypes.push(Archetype::new(signature));
        id
    }

    pub(crate) fn get_archetype(&self, id: usize) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    /// Disjoint mutable borrows of the archetypes named by `ids`. Panics if
    /// `ids` contains a duplicate or an out-of-range index; callers only
    /// ever pass a deduplicated match set built from `archetype_index`.
    pub(crate) fn archetypes_mut(&mut self, ids: &[usize]) -> Vec<&mut Archetype> {
        let base = self.archetypes.as_mut_ptr();
        let len = self.archetypes.len();
        let mut seen = std::collections::HashSet::with_capacity(ids.len());
        ids.iter()
            .map(|&id| {
                assert!(id < len, "archetype index out of range");
                assert!(seen.insert(id), "duplicate archetype index");
                // SAFETY: every id is distinct and in range, so each
                // pointer names a disjoint element of the backing Vec.
                unsafe { &mut *base.add(id) }
            })
            .collect()
    }

    pub(crate) fn archetypes_matching(&self, signature: &QuerySignature) -> Vec<usize> {
        self.archetypes
            .iter()
            .enumerate()
            .filter_map(|(id, arch)| signature.matches(arch).then_some(id))
            .collect()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // ---- queries -------------------------------------------------------

    pub fn query<'w, Q: QueryFilter + QueryFetch<'w>>(&'w self) -> Query<'w, Q> {
        Query::new(self)
    }

    pub fn query_mut<'w, Q: QueryFilter + QueryFetchMut<'w>>(&'w mut self) -> QueryMut<'w, Q> {
        QueryMut::new(self)
    }

    // ---- resources -------------------------------------------------------

    pub fn insert_resource<R: Any + Send + Sync>(&mut self, value: R) {
        self.resources.insert(value);
    }

    pub fn init_resource<R: Any + Send + Sync>(&mut self, value: R) -> Result<()> {
        self.resources.init(value)
    }

    pub fn try_init_resource<R: Any + Send + Sync>(&mut self, value: R) {
        self.resources.try_init(value);
    }

    pub fn resource<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.resources.get::<R>()
    }

    pub fn resource_mut<R: Any + Send + Sync>(&mut self) -> Option<&mut R> {
        self.resources.get_mut::<R>()
    }

    pub fn has_resource<R: Any + Send + Sync>(&self) -> bool {
        self.resources.contains::<R>()
    }

    pub fn remove_resource<R: Any + Send + Sync>(&mut self) -> Option<R> {
        self.resources.remove::<R>()
    }

    // ---- events -------------------------------------------------------

    pub fn event_writer<E: 'static + Send + Sync>(&mut self) -> EventWriter<'_, E> {
        EventWriter::new(&mut self.events)
    }

    pub fn event_reader<E: 'static + Send + Sync + Clone>(&self) -> EventReader<'_, E> {
        EventReader::new(&self.events)
    }

    pub fn write_event<E: 'static + Send + Sync>(&mut self, event: E) {
        self.events.write(event);
    }

    // ---- commands & frame update -------------------------------------------------------

    /// Merge per-system command buffers from one completed schedule stage,
    /// in the order given (already FIFO-sorted by `SystemId` by the
    /// executor), flushing any outstanding entity reservations first so
    /// commands that reference a reserved-but-not-yet-materialized entity
    /// see it as live.
    pub fn merge_command_buffers(&mut self, buffers: Vec<WorldCmdBuffer>) -> Result<()> {
        self.entities.flush();
        for mut buffer in buffers {
            buffer.apply(self)?;
        }
        Ok(())
    }

    /// Merge per-system local event buffers from one completed schedule
    /// stage into the shared registry, at the same barrier
    /// `merge_command_buffers` runs at.
    pub fn merge_event_buffers(&mut self, buffers: Vec<crate::event::LocalEventBuffer>) {
        for buffer in buffers {
            buffer.merge_into(&mut self.events);
        }
    }

    /// End-of-frame bookkeeping: materialize outstanding entity
    /// reservations and rotate every event queue so events written this
    /// frame are visible through the next, then dropped.
    pub fn update(&mut self) {
        self.entities.flush();
        self.events.update_all();
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.archetypes.clear();
        self.archetype_index.clear();
        self.resources.clear();
        self.events.clear_all();
        let empty_sig = ArchetypeSignature::new();
        self.archetypes.push(Archetype::new(empty_sig.clone()));
        self.archetype_index.insert(empty_sig, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[test]
    fn spawn_then_despawn_invalidates_entity() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 },));
        assert!(world.is_alive(e));
        world.despawn(e).unwrap();
        assert!(!world.is_alive(e));
    }

    #[test]
    fn get_component_round_trips() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 1.0, y: 2.0 },));
        assert_eq!(*world.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn add_component_moves_entity_to_new_archetype() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 },));
        world.add_component(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        assert!(world.has_component::<Velocity>(e));
        assert_eq!(*world.get_component::<Position>(e).unwrap(), Position { x: 0.0, y: 0.0 });
    }

    #[test]
    fn remove_component_returns_value_and_moves_entity() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 3.0, dy: 4.0 }));
        let removed = world.remove_component::<Velocity>(e).unwrap();
        assert_eq!(removed, Velocity { dx: 3.0, dy: 4.0 });
        assert!(!world.has_component::<Velocity>(e));
        assert!(world.has_component::<Position>(e));
    }

    #[test]
    fn archetype_edges_are_cached_after_first_transition() {
        let mut world = World::new();
        let e1 = world.spawn((Position { x: 0.0, y: 0.0 },));
        let e2 = world.spawn((Position { x: 1.0, y: 1.0 },));
        world.add_component(e1, Velocity { dx: 0.0, dy: 0.0 }).unwrap();
        let loc = world.entities.location(e2).unwrap();
        assert!(world.archetypes[loc.archetype_id]
            .get_add_edge(TypeId::of::<Velocity>())
            .is_some());
        world.add_component(e2, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        assert!(world.has_component::<Velocity>(e2));
    }

    #[test]
    fn query_iterates_matching_entities() {
        let mut world = World::new();
        world.spawn((Position { x: 1.0, y: 1.0 },));
        world.spawn((Position { x: 2.0, y: 2.0 }, Velocity { dx: 0.0, dy: 0.0 }));
        world.spawn((Velocity { dx: 5.0, dy: 5.0 },));

        let count = world.query::<&Position>().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn reserve_then_update_materializes_entity() {
        let world = World::new();
        let e = world.reserve_entity();
        assert!(!world.is_alive(e));
        let mut world = world;
        world.update();
        assert!(world.is_alive(e));
    }

    #[test]
    fn resource_round_trip() {
        let mut world = World::new();
        world.insert_resource(42u32);
        assert_eq!(*world.resource::<u32>().unwrap(), 42);
    }

    /// Invariant: every component column in an archetype has exactly as
    /// many entries as that archetype's entity list, through spawns,
    /// structural moves and swap-removes.
    #[test]
    fn archetype_columns_stay_in_step_with_entity_list() {
        let mut world = World::new();
        let mut entities = Vec::new();
        for i in 0..20 {
            let e = world.spawn((Position { x: i as f32, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }));
            entities.push(e);
        }
        for (i, &e) in entities.iter().enumerate() {
            if i % 2 == 0 {
                world.remove_component::<Velocity>(e).unwrap();
            }
        }
        for &e in entities.iter().step_by(3) {
            if world.is_alive(e) {
                world.despawn(e).unwrap();
            }
        }

        for archetype in &world.archetypes {
            let entity_len = archetype.len();
            for &type_id in archetype.signature() {
                let column = archetype.get_column(type_id).expect("declared column missing");
                assert_eq!(column.len(), entity_len);
            }
        }
    }

    /// Invariant: no two archetypes in the graph share the same canonical
    /// component set.
    #[test]
    fn no_two_archetypes_share_a_signature() {
        let mut world = World::new();
        for i in 0..5 {
            world.spawn((Position { x: i as f32, y: 0.0 },));
        }
        for i in 0..5 {
            world.spawn((Position { x: i as f32, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }));
        }
        for i in 0..5 {
            world.spawn((Velocity { dx: i as f32, dy: 0.0 },));
        }

        for i in 0..world.archetypes.len() {
            for j in (i + 1)..world.archetypes.len() {
                let mut a = world.archetypes[i].signature().clone();
                let mut b = world.archetypes[j].signature().clone();
                a.sort_unstable_by_key(|t| format!("{t:?}"));
                b.sort_unstable_by_key(|t| format!("{t:?}"));
                assert_ne!(a, b);
            }
        }
    }

    /// Invariant: following an add-edge for component `c` lands on an
    /// archetype whose set is exactly the source set plus `c`, and
    /// symmetrically for remove-edges.
    #[test]
    fn add_and_remove_edges_agree_with_signature_algebra() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 },));
        world.add_component(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();

        let src_id = world
            .archetypes
            .iter()
            .position(|a| a.signature() == &vec![TypeId::of::<Position>()])
            .expect("Position-only archetype must still be a live node in the graph");

        let dst_id = world.archetypes[src_id]
            .get_add_edge(TypeId::of::<Velocity>())
            .expect("add edge for Velocity must be cached after the transition above");
        assert!(world.archetypes[dst_id].has_component(TypeId::of::<Position>()));
        assert!(world.archetypes[dst_id].has_component(TypeId::of::<Velocity>()));
        assert_eq!(world.archetypes[dst_id].signature().len(), 2);

        let back_id = world.archetypes[dst_id]
            .get_remove_edge(TypeId::of::<Velocity>())
            .expect("remove edge for Velocity must be cached symmetrically");
        assert_eq!(world.archetypes[back_id].signature(), world.archetypes[src_id].signature());
    }
}
