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

//! Typed singleton resource registry.

use std::any::{Any, TypeId};

use ahash::AHashMap;

use crate::error::{EcsError, Result};

/// One instance per type, keyed by `TypeId`. Holds arbitrary `'static`
/// values the same way `World`'s component columns hold component data,
/// except there is exactly one slot per type rather than one per entity.
#[derive(Default)]
pub struct ResourceRegistry {
    values: AHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            values: AHashMap::default(),
        }
    }

    /// Insert, replacing any existing value of this type.
    pub fn insert<R: Any + Send + Sync>(&mut self, value: R) {
        self.values.insert(TypeId::of::<R>(), Box::new(value));
    }

    /// Insert only if absent; fatal if a value of this type already exists.
    pub fn init<R: Any + Send + Sync>(&mut self, value: R) -> Result<()> {
        if self.values.contains_key(&TypeId::of::<R>()) {
            return Err(EcsError::ResourceAlreadyExists(TypeId::of::<R>()));
        }
        self.values.insert(TypeId::of::<R>(), Box::new(value));
        Ok(())
    }

    /// Insert only if absent; silently does nothing otherwise.
    pub fn try_init<R: Any + Send + Sync>(&mut self, value: R) {
        self.values.entry(TypeId::of::<R>()).or_insert_with(|| Box::new(value));
    }

    pub fn get<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.values.get(&TypeId::of::<R>()).and_then(|b| b.downcast_ref::<R>())
    }

    pub fn get_mut<R: Any + Send + Sync>(&mut self) -> Option<&mut R> {
        self.values.get_mut(&TypeId::of::<R>()).and_then(|b| b.downcast_mut::<R>())
    }

    pub fn contains<R: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<R>())
    }

    pub fn remove<R: Any + Send + Sync>(&mut self) -> Option<R> {
        self.values
            .remove(&TypeId::of::<R>())
            .and_then(|b| b.downcast::<R>().ok())
            .map(|b| *b)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
