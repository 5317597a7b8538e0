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

//! Double-buffered typed event queues.
//!
//! An event written during frame N is visible to readers during frame N and
//! frame N+1, then dropped on the frame N+2 rotation. `EventQueue<E>::update`
//! performs that rotation: `previous = current; current = []`.

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use ahash::AHashMap;

/// Per-type double buffer.
pub struct EventQueue<E> {
    previous: Vec<E>,
    current: Vec<E>,
}

impl<E> EventQueue<E> {
    fn new() -> Self {
        Self {
            previous: Vec::new(),
            current: Vec::new(),
        }
    }

    fn push(&mut self, event: E) {
        self.current.push(event);
    }

    fn extend(&mut self, events: impl IntoIterator<Item = E>) {
        self.current.extend(events);
    }

    /// Rotate the buffers at the start of a new frame.
    fn update(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    fn clear(&mut self) {
        self.previous.clear();
        self.current.clear();
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased holder for every live `EventQueue<E>`, keyed by `TypeId`.
/// Owned by `World`; rotated wholesale on `World::update`.
#[derive(Default)]
pub struct EventRegistry {
    queues: AHashMap<TypeId, Box<dyn AnyEventQueue>>,
}

trait AnyEventQueue: Any + Send + Sync {
    fn update(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: 'static + Send + Sync> AnyEventQueue for EventQueue<E> {
    fn update(&mut self) {
        EventQueue::update(self);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue<E: 'static + Send + Sync>(&mut self) -> &mut EventQueue<E> {
        self.queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(EventQueue::<E>::new()))
            .as_any_mut()
            .downcast_mut::<EventQueue<E>>()
            .expect("event queue type mismatch")
    }

    fn queue_ref<E: 'static + Send + Sync>(&self) -> Option<&EventQueue<E>> {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|q| q.as_any().downcast_ref::<EventQueue<E>>())
    }

    pub fn write<E: 'static + Send + Sync>(&mut self, event: E) {
        self.queue::<E>().push(event);
    }

    pub fn write_bulk<E: 'static + Send + Sync>(&mut self, events: impl IntoIterator<Item = E>) {
        self.queue::<E>().extend(events);
    }

    /// Rotate every registered queue. Called once per `World::update`.
    pub fn update_all(&mut self) {
        for queue in self.queues.values_mut() {
            queue.update();
        }
    }

    pub fn clear<E: 'static + Send + Sync>(&mut self) {
        if let Some(queue) = self.queues.get_mut(&TypeId::of::<E>()) {
            queue
                .as_any_mut()
                .downcast_mut::<EventQueue<E>>()
                .expect("event queue type mismatch")
                .clear();
        }
    }

    pub fn clear_all(&mut self) {
        self.queues.clear();
    }
}

/// Per-system local event buffer. Writes recorded through a
/// `LocalEventWriter` during a system's run accumulate here instead of
/// touching the shared `EventRegistry` directly; the executor merges every
/// stage member's buffer into the world at the same barrier it merges
/// `WorldCmdBuffer`s, so two systems writing the same event type can still
/// run concurrently without racing on one `Vec`.
#[derive(Default)]
pub struct LocalEventBuffer {
    queues: AHashMap<TypeId, Box<dyn ErasedEventVec>>,
}

trait ErasedEventVec: Any + Send {
    fn merge_into(self: Box<Self>, registry: &mut EventRegistry);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: 'static + Send + Sync> ErasedEventVec for Vec<E> {
    fn merge_into(self: Box<Self>, registry: &mut EventRegistry) {
        registry.write_bulk(*self);
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl LocalEventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut<E: 'static + Send + Sync>(&mut self) -> &mut Vec<E> {
        self.queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()))
            .as_any_mut()
            .downcast_mut::<Vec<E>>()
            .expect("local event buffer type mismatch")
    }

    pub fn write<E: 'static + Send + Sync>(&mut self, event: E) {
        self.queue_mut::<E>().push(event);
    }

    pub fn write_bulk<E: 'static + Send + Sync>(&mut self, events: impl IntoIterator<Item = E>) {
        self.queue_mut::<E>().extend(events);
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Drain every recorded event type into `registry`, preserving each
    /// type's recording order. Called once per system buffer at the same
    /// barrier `WorldCmdBuffer::apply` runs at.
    pub fn merge_into(self, registry: &mut EventRegistry) {
        for queue in self.queues.into_values() {
            queue.merge_into(registry);
        }
    }
}

/// A handle systems use to write events of type `E` into a system's local
/// buffer; merged into the world at the next barrier.
pub struct LocalEventWriter<'a, E: 'static + Send + Sync> {
    buffer: &'a mut LocalEventBuffer,
    _marker: PhantomData<E>,
}

impl<'a, E: 'static + Send + Sync> LocalEventWriter<'a, E> {
    pub fn new(buffer: &'a mut LocalEventBuffer) -> Self {
        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    pub fn write(&mut self, event: E) {
        self.buffer.write(event);
    }

    pub fn write_bulk(&mut self, events: impl IntoIterator<Item = E>) {
        self.buffer.write_bulk(events);
    }
}

/// A handle systems use to write events of type `E` for the current frame.
pub struct EventWriter<'w, E: 'static + Send + Sync> {
    registry: &'w mut EventRegistry,
    _marker: PhantomData<E>,
}

impl<'w, E: 'static + Send + Sync> EventWriter<'w, E> {
    pub fn new(registry: &'w mut EventRegistry) -> Self {
        Self {
            registry,
            _marker: PhantomData,
        }
    }

    pub fn write(&mut self, event: E) {
        self.registry.write(event);
    }

    pub fn write_bulk(&mut self, events: impl IntoIterator<Item = E>) {
        self.registry.write_bulk(events);
    }
}

/// A handle systems use to read events of type `E`. `read()` snapshots
/// `previous ++ current` on first access and caches it for the reader's
/// lifetime: a reader created mid-frame keeps returning the same slice even
/// if more events of the same type are written afterward.
pub struct EventReader<'w, E: 'static + Send + Sync + Clone> {
    registry: &'w EventRegistry,
    cache: Option<Vec<E>>,
}

impl<'w, E: 'static + Send + Sync + Clone> EventReader<'w, E> {
    pub fn new(registry: &'w EventRegistry) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    pub fn read(&mut self) -> &[E] {
        if self.cache.is_none() {
            let snapshot = match self.registry.queue_ref::<E>() {
                Some(q) => q.previous.iter().chain(q.current.iter()).cloned().collect(),
                None => Vec::new(),
            };
            self.cache = Some(snapshot);
        }
        self.cache.as_deref().unwrap()
    }

    pub fn is_empty(&mut self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Damage(u32);

    #[test]
    fn event_visible_for_two_frames_then_dropped() {
        let mut reg = EventRegistry::new();
        reg.write(Damage(5));

        let mut reader = EventReader::<Damage>::new(&reg);
        assert_eq!(reader.read(), &[Damage(5)]);
        drop(reader);

        reg.update_all(); // frame N+1: event moves to `previous`
        let mut reader = EventReader::<Damage>::new(&reg);
        assert_eq!(reader.read(), &[Damage(5)]);
        drop(reader);

        reg.update_all(); // frame N+2: event is gone
        let mut reader = EventReader::<Damage>::new(&reg);
        assert!(reader.read().is_empty());
    }

    #[test]
    fn reader_caches_snapshot_on_first_access() {
        let mut reg = EventRegistry::new();
        reg.write(Damage(1));
        let mut reader = EventReader::<Damage>::new(&reg);
        assert_eq!(reader.read().len(), 1);
        assert_eq!(reader.read().len(), 1);
    }

    #[test]
    fn clear_drops_pending_events() {
        let mut reg = EventRegistry::new();
        reg.write(Damage(1));
        reg.clear::<Damage>();
        let mut reader = EventReader::<Damage>::new(&reg);
        assert!(reader.read().is_empty());
    }

    #[test]
    fn local_buffer_is_invisible_until_merged() {
        let mut reg = EventRegistry::new();
        let mut local = LocalEventBuffer::new();
        LocalEventWriter::<Damage>::new(&mut local).write(Damage(7));

        let mut reader = EventReader::<Damage>::new(&reg);
        assert!(reader.read().is_empty());
        drop(reader);

        local.merge_into(&mut reg);
        let mut reader = EventReader::<Damage>::new(&reg);
        assert_eq!(reader.read(), &[Damage(7)]);
    }

    #[test]
    fn local_buffer_preserves_write_order_per_type() {
        let mut reg = EventRegistry::new();
        let mut local = LocalEventBuffer::new();
        let mut writer = LocalEventWriter::<Damage>::new(&mut local);
        writer.write(Damage(1));
        writer.write(Damage(2));
        writer.write(Damage(3));
        local.merge_into(&mut reg);

        let mut reader = EventReader::<Damage>::new(&reg);
        assert_eq!(reader.read(), &[Damage(1), Damage(2), Damage(3)]);
    }
}
