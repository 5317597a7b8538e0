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

//! Archetype storage (Structure-of-Arrays) and the archetype graph.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::component::Component;
use crate::entity::Entity;

/// Canonical, sorted component-set identity of an archetype.
pub type ArchetypeSignature = Vec<TypeId>;

/// One archetype: a dense row per live entity sharing the same exact
/// component set, one column per component type, indexed in lockstep.
pub struct Archetype {
    signature: ArchetypeSignature,
    entities: Vec<Entity>,
    components: Vec<ComponentColumn>,
    component_indices: FxHashMap<TypeId, usize>,
    columns_initialized: bool,
    add_edges: FxHashMap<TypeId, usize>,
    remove_edges: FxHashMap<TypeId, usize>,
}

impl Archetype {
    pub fn new(signature: ArchetypeSignature) -> Self {
        Self {
            signature,
            entities: Vec::new(),
            components: Vec::new(),
            component_indices: FxHashMap::default(),
            columns_initialized: false,
            add_edges: FxHashMap::default(),
            remove_edges: FxHashMap::default(),
        }
    }

    pub fn signature(&self) -> &ArchetypeSignature {
        &self.signature
    }

    pub fn has_component(&self, type_id: TypeId) -> bool {
        self.component_indices.contains_key(&type_id)
    }

    pub fn has_components(&self, types: &[TypeId]) -> bool {
        types.iter().all(|t| self.has_component(*t))
    }

    pub fn has_any_components(&self, types: &[TypeId]) -> bool {
        types.iter().any(|t| self.has_component(*t))
    }

    /// Cached "what archetype results from adding `c`" edge, if known.
    pub fn get_add_edge(&self, c: TypeId) -> Option<usize> {
        self.add_edges.get(&c).copied()
    }

    pub fn get_remove_edge(&self, c: TypeId) -> Option<usize> {
        self.remove_edges.get(&c).copied()
    }

    pub fn set_add_edge(&mut self, c: TypeId, dst: usize) {
        self.add_edges.insert(c, dst);
    }

    pub fn set_remove_edge(&mut self, c: TypeId, dst: usize) {
        self.remove_edges.insert(c, dst);
    }

    /// Allocate a row for `entity`, growing all columns. Returns the row index.
    pub fn allocate_row(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Remove `row` via swap-with-last, dropping the removed row's
    /// component values in place. Returns the entity that was moved into
    /// `row`, if any, so the caller can update its location.
    ///
    /// # Safety
    /// `row` must be a valid index within this archetype.
    pub unsafe fn remove_row(&mut self, row: usize) -> Option<Entity> {
        if row >= self.entities.len() {
            return None;
        }

        self.entities.swap_remove(row);
        for column in &mut self.components {
            column.swap_remove(row);
        }

        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Remove `row` via swap-with-last, WITHOUT dropping the removed row's
    /// component values — for structural moves, where every byte has
    /// already been bitwise-copied into a destination archetype and
    /// running the destructor here would double-free. Returns the entity
    /// that was moved into `row`, if any.
    ///
    /// # Safety
    /// `row` must be a valid index within this archetype, and every
    /// component value at `row` must already have an owning copy elsewhere
    /// (or be intentionally leaked).
    pub unsafe fn forget_row(&mut self, row: usize) -> Option<Entity> {
        if row >= self.entities.len() {
            return None;
        }

        self.entities.swap_remove(row);
        for column in &mut self.components {
            column.swap_remove_no_drop(row);
        }

        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    pub fn get_column(&self, type_id: TypeId) -> Option<&ComponentColumn> {
        let idx = *self.component_indices.get(&type_id)?;
        self.components.get(idx)
    }

    pub fn get_column_by_index(&self, index: usize) -> Option<&ComponentColumn> {
        self.components.get(index)
    }

    pub fn get_column_mut(&mut self, type_id: TypeId) -> Option<&mut ComponentColumn> {
        let idx = *self.component_indices.get(&type_id)?;
        self.components.get_mut(idx)
    }

    pub fn column_index(&self, type_id: TypeId) -> Option<usize> {
        self.component_indices.get(&type_id).copied()
    }

    pub fn get_column_mut_by_index(&mut self, index: usize) -> Option<&mut ComponentColumn> {
        self.components.get_mut(index)
    }

    pub fn reserve_rows(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.components {
            column.reserve(additional);
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Register a column for `T`, a no-op if one already exists.
    pub fn register_component<T: Component>(&mut self) {
        let type_id = TypeId::of::<T>();
        if !self.component_indices.contains_key(&type_id) {
            let idx = self.components.len();
            self.components.push(ComponentColumn::new::<T>());
            self.component_indices.insert(type_id, idx);
        }
    }

    /// Add a column moved in from another archetype (shared-column case of a
    /// structural transition): same type, empty, ready to receive rows.
    pub fn add_column_raw(&mut self, type_id: TypeId, column: ComponentColumn) {
        if !self.component_indices.contains_key(&type_id) {
            let idx = self.components.len();
            self.components.push(column);
            self.component_indices.insert(type_id, idx);
        }
    }

    pub fn columns_initialized(&self) -> bool {
        self.columns_initialized
    }

    pub fn mark_columns_initialized(&mut self) {
        self.columns_initialized = true;
    }
}

/// Type-erased, dense per-component column. Growth doubles capacity.
pub struct ComponentColumn {
    data: Vec<u8>,
    item_size: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ComponentColumn {
    pub fn new<T: Component>() -> Self {
        Self {
            data: Vec::new(),
            item_size: std::mem::size_of::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe {
                    std::ptr::drop_in_place(ptr as *mut T);
                })
            } else {
                None
            },
        }
    }

    /// An empty column sharing this one's element layout, for building a
    /// destination archetype during a structural transition.
    pub fn clone_empty(&self) -> Self {
        Self {
            data: Vec::new(),
            item_size: self.item_size,
            drop_fn: self.drop_fn,
        }
    }

    pub fn get_item_size(&self) -> usize {
        self.item_size
    }

    /// Pointer to the (possibly uninitialized) slot for `index`, growing the
    /// backing buffer if needed.
    pub fn get_ptr_mut(&mut self, index: usize) -> *mut u8 {
        let offset = index * self.item_size;
        if offset + self.item_size > self.data.len() {
            self.data.resize(offset + self.item_size, 0);
        }
        unsafe { self.data.as_mut_ptr().add(offset) }
    }

    pub fn get<T: Component>(&self, index: usize) -> Option<&T> {
        let offset = index * self.item_size;
        if offset + self.item_size > self.data.len() {
            return None;
        }
        Some(unsafe { &*(self.data.as_ptr().add(offset) as *const T) })
    }

    /// Raw typed pointer to element 0, for callers (queries) that need to
    /// hold several columns' pointers at once to dodge the aliasing rules
    /// that would otherwise prevent fetching two components per row.
    pub fn as_ptr<T: Component>(&self) -> *const T {
        self.data.as_ptr() as *const T
    }

    pub fn as_mut_ptr<T: Component>(&mut self) -> *mut T {
        self.data.as_mut_ptr() as *mut T
    }

    pub fn get_mut<T: Component>(&mut self, index: usize) -> Option<&mut T> {
        let offset = index * self.item_size;
        if offset + self.item_size > self.data.len() {
            return None;
        }
        Some(unsafe { &mut *(self.data.as_mut_ptr().add(offset) as *mut T) })
    }

    pub fn reserve(&mut self, additional_items: usize) {
        self.data.reserve(additional_items * self.item_size.max(1));
    }

    pub fn len(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Swap-remove the element at `row`, dropping the vacated last slot in
    /// place of a move. Mirrors the entity-list swap-remove so columns stay
    /// in lockstep with `Archetype::entities`.
    fn swap_remove(&mut self, row: usize) {
        self.swap_remove_impl(row, true);
    }

    /// Swap-remove the element at `row` without dropping it — the caller is
    /// responsible for the value's lifetime (it was bitwise-copied out
    /// beforehand).
    fn swap_remove_no_drop(&mut self, row: usize) {
        self.swap_remove_impl(row, false);
    }

    fn swap_remove_impl(&mut self, row: usize, drop_removed: bool) {
        let len = self.len();
        if row >= len {
            return;
        }
        let last = len - 1;
        unsafe {
            let row_ptr = self.data.as_mut_ptr().add(row * self.item_size);
            if drop_removed {
                if let Some(drop_fn) = self.drop_fn {
                    drop_fn(row_ptr);
                }
            }
            if row != last {
                let last_ptr = self.data.as_ptr().add(last * self.item_size);
                std::ptr::copy_nonoverlapping(last_ptr, row_ptr, self.item_size);
            }
        }
        self.data.truncate(last * self.item_size);
    }
}

impl Drop for ComponentColumn {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            let count = self.len();
            for i in 0..count {
                let offset = i * self.item_size;
                unsafe {
                    drop_fn(self.data.as_mut_ptr().add(offset));
                }
            }
        }
    }
}
