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

//! The `System` trait, its declared access policy, and the per-run context
//! handed to it.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::command::WorldCmdBuffer;
use crate::error::Result;
use crate::event::{EventReader, LocalEventBuffer, LocalEventWriter};
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub u32);

/// What a system touches, declared once at registration and trusted by the
/// scheduler to build the conflict graph. A system that issues commands is
/// treated as if it writes the whole world, since a command can structurally
/// move any entity and is not visible to static analysis.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub component_reads: Vec<TypeId>,
    pub component_writes: Vec<TypeId>,
    pub resource_reads: Vec<TypeId>,
    pub resource_writes: Vec<TypeId>,
    pub event_reads: Vec<TypeId>,
    pub event_writes: Vec<TypeId>,
    pub issues_commands: bool,
}

impl AccessPolicy {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn reads_component<T: 'static>(mut self) -> Self {
        self.component_reads.push(TypeId::of::<T>());
        self
    }

    pub fn writes_component<T: 'static>(mut self) -> Self {
        self.component_writes.push(TypeId::of::<T>());
        self
    }

    pub fn reads_resource<T: 'static>(mut self) -> Self {
        self.resource_reads.push(TypeId::of::<T>());
        self
    }

    pub fn writes_resource<T: 'static>(mut self) -> Self {
        self.resource_writes.push(TypeId::of::<T>());
        self
    }

    pub fn reads_event<T: 'static>(mut self) -> Self {
        self.event_reads.push(TypeId::of::<T>());
        self
    }

    pub fn writes_event<T: 'static>(mut self) -> Self {
        self.event_writes.push(TypeId::of::<T>());
        self
    }

    pub fn with_commands(mut self) -> Self {
        self.issues_commands = true;
        self
    }

    fn overlaps(a: &[TypeId], b: &[TypeId]) -> bool {
        a.iter().any(|t| b.contains(t))
    }

    /// Two policies conflict if they'd alias mutable state: a write against
    /// a write or a read on the same component/resource, a write against an
    /// event queue already being written, or either side issuing commands
    /// (commands can touch anything).
    pub fn conflicts_with(&self, other: &AccessPolicy) -> bool {
        if self.issues_commands || other.issues_commands {
            return true;
        }
        Self::overlaps(&self.component_writes, &other.component_writes)
            || Self::overlaps(&self.component_writes, &other.component_reads)
            || Self::overlaps(&self.component_reads, &other.component_writes)
            || Self::overlaps(&self.resource_writes, &other.resource_writes)
            || Self::overlaps(&self.resource_writes, &other.resource_reads)
            || Self::overlaps(&self.resource_reads, &other.resource_writes)
            || Self::overlaps(&self.event_writes, &other.event_writes)
    }
}

/// Scoped view of the world a running system is allowed to touch.
///
/// # Safety
/// The executor constructs one of these per system in a stage from a raw
/// pointer to the world and runs every system in the stage concurrently via
/// rayon. This is sound only because the scheduler never places two systems
/// whose `AccessPolicy`s conflict in the same stage — see `executor.rs`'s
/// module documentation for the full argument.
pub struct SystemContext<'w> {
    world: *mut World,
    commands: WorldCmdBuffer,
    events: LocalEventBuffer,
    _marker: PhantomData<&'w mut World>,
}

impl<'w> SystemContext<'w> {
    /// # Safety
    /// `world` must outlive `'w` and no other live reference to it may
    /// alias the component/resource/event state this system's declared
    /// `AccessPolicy` touches for the duration of `'w`.
    pub unsafe fn new(world: &'w mut World) -> Self {
        Self {
            world: world as *mut World,
            commands: WorldCmdBuffer::new(),
            events: LocalEventBuffer::new(),
            _marker: PhantomData,
        }
    }

    pub fn world(&self) -> &World {
        unsafe { &*self.world }
    }

    /// Mutable access to the world through a shared `SystemContext`. Sound
    /// under the same invariant documented on the struct: the executor only
    /// ever hands out contexts whose declared writes are disjoint within a
    /// stage.
    #[allow(clippy::mut_from_ref)]
    pub fn world_mut(&self) -> &mut World {
        unsafe { &mut *self.world }
    }

    pub fn commands(&mut self) -> &mut WorldCmdBuffer {
        &mut self.commands
    }

    /// Read events of type `E` as they stood at the start of this stage.
    /// Goes straight to the world's shared registry: safe to call
    /// concurrently with another system in the stage writing the same event
    /// type, since those writes land in that system's own local buffer and
    /// aren't merged until the barrier after this stage completes.
    pub fn read_events<E: 'static + Send + Sync + Clone>(&self) -> EventReader<'_, E> {
        self.world().event_reader::<E>()
    }

    /// Write events of type `E` into this system's local buffer. Merged
    /// into the world's event registry at the same barrier
    /// `WorldCmdBuffer`s are merged at.
    pub fn write_events<E: 'static + Send + Sync>(&mut self) -> LocalEventWriter<'_, E> {
        LocalEventWriter::new(&mut self.events)
    }

    /// Consume the context, yielding its recorded commands and local event
    /// writes for the executor to merge at the barrier.
    pub fn finish(self) -> (WorldCmdBuffer, LocalEventBuffer) {
        (self.commands, self.events)
    }
}

pub trait System: Send + Sync {
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> Result<()>;
    fn name(&self) -> &str;
    fn access(&self) -> AccessPolicy;
}

pub type BoxedSystem = Box<dyn System>;

/// Opaque label used to order systems and group them into sets without
/// naming concrete types at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemLabel(pub String);

impl From<&str> for SystemLabel {
    fn from(s: &str) -> Self {
        SystemLabel(s.to_string())
    }
}

impl From<String> for SystemLabel {
    fn from(s: String) -> Self {
        SystemLabel(s)
    }
}

/// Ordering and grouping metadata attached to a system at registration.
/// Built with the fluent `.after()/.before()/.in_set()` chain; consumed by
/// `Schedule` when it builds the conflict/ordering graph.
#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    pub label: Option<SystemLabel>,
    pub after: Vec<SystemLabel>,
    pub before: Vec<SystemLabel>,
    pub sets: Vec<SystemLabel>,
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labeled(mut self, label: impl Into<SystemLabel>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn after(mut self, label: impl Into<SystemLabel>) -> Self {
        self.after.push(label.into());
        self
    }

    pub fn before(mut self, label: impl Into<SystemLabel>) -> Self {
        self.before.push(label.into());
        self
    }

    pub fn in_set(mut self, set: impl Into<SystemLabel>) -> Self {
        self.sets.push(set.into());
        self
    }

    pub fn after_set(mut self, set: impl Into<SystemLabel>) -> Self {
        self.after.push(set.into());
        self
    }

    pub fn before_set(mut self, set: impl Into<SystemLabel>) -> Self {
        self.before.push(set.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_policies_do_not_conflict() {
        let a = AccessPolicy::empty().writes_component::<i32>();
        let b = AccessPolicy::empty().writes_component::<f32>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn overlapping_writes_conflict() {
        let a = AccessPolicy::empty().writes_component::<i32>();
        let b = AccessPolicy::empty().writes_component::<i32>();
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn read_read_does_not_conflict() {
        let a = AccessPolicy::empty().reads_component::<i32>();
        let b = AccessPolicy::empty().reads_component::<i32>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn commands_conflict_with_everything() {
        let a = AccessPolicy::empty().with_commands();
        let b = AccessPolicy::empty();
        assert!(a.conflicts_with(&b));
    }
}
