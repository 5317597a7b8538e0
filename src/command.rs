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

//! Deferred command buffers.
//!
//! Systems never mutate the world's structure directly; they record
//! commands here, and the world merges them in FIFO order at the next
//! barrier. `EntityCmdBuffer` scopes a handful of ops to one entity;
//! `WorldCmdBuffer` is the per-system buffer a `SystemContext` hands out,
//! holding any number of entity buffers plus arbitrary spawn/custom closures.
//!
//! Every entity-targeting op has a `Try*` and a non-`Try` form: `Try*`
//! silently no-ops if the entity is already dead by the time the buffer is
//! applied, the non-`Try` form returns `EcsError::EntityNotFound`.

use std::any::TypeId;

use crate::component::Component;
use crate::entity::Entity;
use crate::error::Result;
use crate::world::World;

type EntityClosure = Box<dyn FnOnce(&mut World, Entity) -> Result<()> + Send>;
type WorldClosure = Box<dyn FnOnce(&mut World) -> Result<()> + Send>;

enum EntityOp {
    Insert(EntityClosure),
    TryInsert(EntityClosure),
    Remove(TypeId, EntityClosure),
    TryRemove(TypeId, EntityClosure),
    Destroy,
    TryDestroy,
}

/// Commands scoped to a single entity, built with a fluent chain and merged
/// into a `WorldCmdBuffer`.
pub struct EntityCmdBuffer {
    entity: Entity,
    ops: Vec<EntityOp>,
}

impl EntityCmdBuffer {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            ops: Vec::new(),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn insert<T: Component>(mut self, component: T) -> Self {
        self.ops.push(EntityOp::Insert(Box::new(move |world, e| {
            world.add_component(e, component)
        })));
        self
    }

    pub fn try_insert<T: Component>(mut self, component: T) -> Self {
        self.ops.push(EntityOp::TryInsert(Box::new(move |world, e| {
            world.add_component(e, component)
        })));
        self
    }

    pub fn remove<T: Component>(mut self) -> Self {
        self.ops.push(EntityOp::Remove(
            TypeId::of::<T>(),
            Box::new(|world, e| world.remove_component::<T>(e).map(|_| ())),
        ));
        self
    }

    pub fn try_remove<T: Component>(mut self) -> Self {
        self.ops.push(EntityOp::TryRemove(
            TypeId::of::<T>(),
            Box::new(|world, e| world.remove_component::<T>(e).map(|_| ())),
        ));
        self
    }

    pub fn destroy(mut self) -> Self {
        self.ops.push(EntityOp::Destroy);
        self
    }

    pub fn try_destroy(mut self) -> Self {
        self.ops.push(EntityOp::TryDestroy);
        self
    }

    fn apply(self, world: &mut World) -> Result<()> {
        let entity = self.entity;
        for op in self.ops {
            let is_live = world.is_alive(entity);
            match op {
                EntityOp::Insert(f) => {
                    if !is_live {
                        return Err(crate::error::EcsError::EntityNotFound);
                    }
                    f(world, entity)?;
                }
                EntityOp::TryInsert(f) => {
                    if is_live {
                        f(world, entity)?;
                    }
                }
                EntityOp::Remove(_, f) => {
                    if !is_live {
                        return Err(crate::error::EcsError::EntityNotFound);
                    }
                    f(world, entity)?;
                }
                EntityOp::TryRemove(_, f) => {
                    if is_live {
                        f(world, entity)?;
                    }
                }
                EntityOp::Destroy => {
                    if !is_live {
                        return Err(crate::error::EcsError::EntityNotFound);
                    }
                    world.despawn(entity)?;
                }
                EntityOp::TryDestroy => {
                    if is_live {
                        world.despawn(entity)?;
                    }
                }
            }
        }
        Ok(())
    }
}

enum WorldOp {
    Entity(EntityCmdBuffer),
    Spawn(WorldClosure),
    Custom(WorldClosure),
}

/// The command buffer a system's `SystemContext` hands out. Every recorded
/// op is applied, in the order recorded, when the world merges command
/// buffers from every system in a stage at the next barrier.
#[derive(Default)]
pub struct WorldCmdBuffer {
    ops: Vec<WorldOp>,
}

impl WorldCmdBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a bundle spawn, to be materialized at merge time.
    pub fn spawn<F>(&mut self, f: F)
    where
        F: FnOnce(&mut World) -> Result<()> + Send + 'static,
    {
        self.ops.push(WorldOp::Spawn(Box::new(f)));
    }

    /// Queue an arbitrary world mutation.
    pub fn add<F>(&mut self, f: F)
    where
        F: FnOnce(&mut World) -> Result<()> + Send + 'static,
    {
        self.ops.push(WorldOp::Custom(Box::new(f)));
    }

    /// Start (and immediately queue) a chain of per-entity commands.
    pub fn entity(&mut self, entity: Entity) -> EntityCmdBufferHandle<'_> {
        EntityCmdBufferHandle {
            owner: self,
            buffer: Some(EntityCmdBuffer::new(entity)),
        }
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.ops.push(WorldOp::Entity(EntityCmdBuffer::new(entity).destroy()));
    }

    pub fn try_despawn(&mut self, entity: Entity) {
        self.ops
            .push(WorldOp::Entity(EntityCmdBuffer::new(entity).try_destroy()));
    }

    /// Merge into `world` in FIFO order, clearing this buffer.
    pub fn apply(&mut self, world: &mut World) -> Result<()> {
        for op in self.ops.drain(..) {
            match op {
                WorldOp::Entity(buf) => buf.apply(world)?,
                WorldOp::Spawn(f) => f(world)?,
                WorldOp::Custom(f) => f(world)?,
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Fluent handle returned by `WorldCmdBuffer::entity`; queues the finished
/// chain into the owning buffer on drop.
pub struct EntityCmdBufferHandle<'a> {
    owner: &'a mut WorldCmdBuffer,
    buffer: Option<EntityCmdBuffer>,
}

impl<'a> EntityCmdBufferHandle<'a> {
    pub fn insert<T: Component>(mut self, component: T) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().insert(component));
        self
    }

    pub fn try_insert<T: Component>(mut self, component: T) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().try_insert(component));
        self
    }

    pub fn remove<T: Component>(mut self) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().remove::<T>());
        self
    }

    pub fn try_remove<T: Component>(mut self) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().try_remove::<T>());
        self
    }

    pub fn destroy(mut self) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().destroy());
        self
    }

    pub fn try_destroy(mut self) -> Self {
        self.buffer = Some(self.buffer.take().unwrap().try_destroy());
        self
    }
}

impl<'a> Drop for EntityCmdBufferHandle<'a> {
    fn drop(&mut self) {
        if let Some(buf) = self.buffer.take() {
            self.owner.ops.push(WorldOp::Entity(buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[derive(Debug)]
    struct Marker;

    #[test]
    fn despawn_command_applies_in_order() {
        let mut world = World::new();
        let e = world.spawn((Marker,));
        let mut cmds = WorldCmdBuffer::new();
        cmds.despawn(e);
        cmds.apply(&mut world).unwrap();
        assert!(!world.is_alive(e));
    }

    #[test]
    fn try_despawn_is_silent_on_dead_entity() {
        let mut world = World::new();
        let e = world.spawn((Marker,));
        world.despawn(e).unwrap();
        let mut cmds = WorldCmdBuffer::new();
        cmds.try_despawn(e);
        assert!(cmds.apply(&mut world).is_ok());
    }

    #[test]
    fn despawn_on_dead_entity_is_fatal() {
        let mut world = World::new();
        let e = world.spawn((Marker,));
        world.despawn(e).unwrap();
        let mut cmds = WorldCmdBuffer::new();
        cmds.despawn(e);
        assert!(cmds.apply(&mut world).is_err());
    }

    #[test]
    fn entity_handle_chains_multiple_ops() {
        let mut world = World::new();
        let e = world.spawn((Marker,));
        let mut cmds = WorldCmdBuffer::new();
        cmds.entity(e).try_remove::<Marker>().try_insert(Marker);
        cmds.apply(&mut world).unwrap();
        assert!(world.has_component::<Marker>(e));
    }
}
