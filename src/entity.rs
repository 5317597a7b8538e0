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

//! Generational entity handles and the lock-free reservation allocator.

use std::sync::atomic::{AtomicIsize, Ordering};

/// A generational entity handle: a slot index plus the generation the slot
/// was at when this handle was issued. Two handles compare equal iff both
/// fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Entity location in archetype storage (archetype index, row within it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype_id: usize,
    pub archetype_row: usize,
}

impl EntityLocation {
    pub const INVALID: Self = Self {
        archetype_id: usize::MAX,
        archetype_row: usize::MAX,
    };
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    allocated: bool,
    location: EntityLocation,
}

/// Allocates and recycles [`Entity`] handles.
///
/// `reserve` is lock-free and callable from any worker thread mid-frame; it
/// hands out a handle whose slot may not exist yet. `flush` (called from
/// `World::update`, single-threaded) materializes every outstanding
/// reservation by growing `slots` and draining `pending`.
///
/// The free-list/cursor scheme: `pending` holds indices freed by a prior
/// `destroy`/`flush` round, in the order they were freed. `free_cursor`
/// starts at `pending.len()` and is atomically decremented by `reserve`.
/// A non-negative result after decrement names a `pending` slot to reuse;
/// a negative result names a brand-new index past the end of `slots`,
/// computed arithmetically so no thread needs to touch `slots` or `pending`
/// to compute it.
pub struct EntityAllocator {
    slots: Vec<Slot>,
    pending: Vec<u32>,
    free_cursor: AtomicIsize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            pending: Vec::new(),
            free_cursor: AtomicIsize::new(0),
        }
    }

    /// Reserve an entity handle without locking. The handle is not live
    /// until the next [`EntityAllocator::flush`].
    pub fn reserve(&self) -> Entity {
        let n = self.free_cursor.fetch_sub(1, Ordering::Relaxed) - 1;
        if n >= 0 {
            let index = self.pending[n as usize];
            let generation = self.slots[index as usize].generation;
            Entity::new(index, generation)
        } else {
            let base = self.slots.len() as isize;
            let new_index = base - n - 1;
            Entity::new(new_index as u32, 0)
        }
    }

    /// Create an entity immediately; it is live as soon as this returns.
    /// Must not be called while reservations are outstanding from other
    /// threads without an intervening `flush` — callers on the main thread
    /// between frames are always safe.
    pub fn create(&mut self) -> Entity {
        debug_assert_eq!(
            self.free_cursor.load(Ordering::Relaxed),
            self.pending.len() as isize,
            "create() called with outstanding unfushed reservations"
        );

        if let Some(index) = self.pending.pop() {
            self.free_cursor
                .store(self.pending.len() as isize, Ordering::Relaxed);
            let slot = &mut self.slots[index as usize];
            slot.allocated = true;
            Entity::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                allocated: true,
                location: EntityLocation::INVALID,
            });
            Entity::new(index, 0)
        }
    }

    /// Materialize every outstanding reservation as a live entity.
    pub fn flush(&mut self) {
        let cursor = self.free_cursor.load(Ordering::Relaxed);

        if cursor < 0 {
            let needed = (-cursor) as usize;
            let start = self.slots.len();
            self.slots.reserve(needed);
            for _ in 0..needed {
                self.slots.push(Slot {
                    generation: 0,
                    allocated: true,
                    location: EntityLocation::INVALID,
                });
            }
            debug_assert_eq!(self.slots.len(), start + needed);
        }

        // `reserve` consumes `pending` from the tail (the same end `create`
        // pops from), so the `reused` entries that were actually handed out
        // are the last `reused` elements, not the first.
        let reused = self.pending.len().saturating_sub(cursor.max(0) as usize);
        let split = self.pending.len() - reused;
        for &index in &self.pending[split..] {
            self.slots[index as usize].allocated = true;
        }
        self.pending.truncate(split);
        self.free_cursor
            .store(self.pending.len() as isize, Ordering::Relaxed);
    }

    /// Assert live and bump the slot's generation, invalidating the handle.
    /// 32-bit generations may wrap after ~4B destroy/create cycles on the
    /// same slot; a wrap is treated as a configuration-level bug rather than
    /// silently aliasing an old handle.
    pub fn destroy(&mut self, entity: Entity) -> crate::error::Result<()> {
        let slot = self
            .slots
            .get_mut(entity.index as usize)
            .filter(|s| s.allocated && s.generation == entity.generation)
            .ok_or(crate::error::EcsError::EntityNotFound)?;

        slot.allocated = false;
        slot.location = EntityLocation::INVALID;
        debug_assert!(
            slot.generation != u32::MAX,
            "entity generation wrapped at slot {}",
            entity.index
        );
        slot.generation = slot.generation.wrapping_add(1);
        self.pending.push(entity.index);
        self.free_cursor
            .store(self.pending.len() as isize, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_live(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|s| s.allocated && s.generation == entity.generation)
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.slots
            .get(entity.index as usize)
            .filter(|s| s.allocated && s.generation == entity.generation)
            .map(|s| s.location)
    }

    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        if let Some(slot) = self.slots.get_mut(entity.index as usize) {
            if slot.allocated && slot.generation == entity.generation {
                slot.location = location;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.allocated).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.pending.clear();
        self.free_cursor.store(0, Ordering::Relaxed);
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
