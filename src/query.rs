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

//! Type-safe component queries with automatic archetype matching.
//!
//! `QueryIter`/`QueryIterMut` implement `std::iter::Iterator` +
//! `ExactSizeIterator`, so every adapter a caller reaches for —
//! `filter`, `map`, `zip`, `take_while`, `enumerate`, `fold`, ... — is the
//! standard library's, not a hand-rolled lookalike. `QueryIteratorExt` adds
//! only the handful of adapters this engine wants that std doesn't already
//! provide.

use std::any::TypeId;
use std::marker::PhantomData;

use smallvec::{smallvec, SmallVec};

use crate::archetype::Archetype;
use crate::component::Component;
use crate::entity::Entity;
use crate::world::World;

const MAX_FILTER_COMPONENTS: usize = 8;

/// Component signature used to find every archetype a query matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QuerySignature {
    pub required: SmallVec<[TypeId; MAX_FILTER_COMPONENTS]>,
    pub excluded: SmallVec<[TypeId; MAX_FILTER_COMPONENTS]>,
}

impl QuerySignature {
    pub fn matches(&self, archetype: &Archetype) -> bool {
        self.required.iter().all(|t| archetype.has_component(*t))
            && self.excluded.iter().all(|t| !archetype.has_component(*t))
    }
}

/// Incrementally-updated set of archetype indices matching one
/// `QuerySignature`. Re-scanning only archetypes created since the query was
/// last used keeps repeated queries over a stable world cheap.
pub struct CachedQueryResult {
    pub matches: Vec<usize>,
    seen_archetypes: usize,
    signature: QuerySignature,
}

impl CachedQueryResult {
    pub fn new(signature: QuerySignature, archetypes: &[Archetype]) -> Self {
        let matches = archetypes
            .iter()
            .enumerate()
            .filter_map(|(id, arch)| signature.matches(arch).then_some(id))
            .collect();
        Self {
            matches,
            seen_archetypes: archetypes.len(),
            signature,
        }
    }

    pub fn update(&mut self, archetypes: &[Archetype]) {
        if archetypes.len() > self.seen_archetypes {
            for (id, arch) in archetypes.iter().enumerate().skip(self.seen_archetypes) {
                if self.signature.matches(arch) {
                    self.matches.push(id);
                }
            }
            self.seen_archetypes = archetypes.len();
        }
    }
}

/// Type-level description of what a query matches: which components must be
/// present (`&T`, `&mut T`, `With<T>`), absent (`Without<T>`), and whether
/// the entity handle itself is fetched (`Entity`).
pub trait QueryFilter {
    fn matches_archetype(archetype: &Archetype) -> bool;
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]>;

    fn signature() -> QuerySignature {
        let mut required: SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> = Self::type_ids();
        required.sort();
        QuerySignature {
            required,
            excluded: Self::excluded_type_ids(),
        }
    }

    fn excluded_type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        SmallVec::new()
    }
}

/// Marker fetching the entity handle itself rather than a component.
pub struct EntityFetch;

/// Require `T` present without fetching it.
pub struct With<T>(PhantomData<T>);

/// Require `T` absent.
pub struct Without<T>(PhantomData<T>);

impl<T: Component> QueryFilter for With<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has_component(TypeId::of::<T>())
    }
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        smallvec![TypeId::of::<T>()]
    }
}

impl<T: Component> QueryFilter for Without<T> {
    fn matches_archetype(archetype: &Archetype) -> bool {
        !archetype.has_component(TypeId::of::<T>())
    }
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        SmallVec::new()
    }
    fn excluded_type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        smallvec![TypeId::of::<T>()]
    }
}

impl QueryFilter for EntityFetch {
    fn matches_archetype(_archetype: &Archetype) -> bool {
        true
    }
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        SmallVec::new()
    }
}

impl<T: Component> QueryFilter for &T {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has_component(TypeId::of::<T>())
    }
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        smallvec![TypeId::of::<T>()]
    }
}

impl<T: Component> QueryFilter for &mut T {
    fn matches_archetype(archetype: &Archetype) -> bool {
        archetype.has_component(TypeId::of::<T>())
    }
    fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
        smallvec![TypeId::of::<T>()]
    }
}

macro_rules! impl_query_filter_tuple {
    ($($T:ident),+) => {
        impl<$($T: QueryFilter),+> QueryFilter for ($($T,)+) {
            fn matches_archetype(archetype: &Archetype) -> bool {
                $($T::matches_archetype(archetype))&&+
            }
            fn type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
                let mut ids = SmallVec::new();
                $(ids.extend($T::type_ids());)+
                ids
            }
            fn excluded_type_ids() -> SmallVec<[TypeId; MAX_FILTER_COMPONENTS]> {
                let mut ids = SmallVec::new();
                $(ids.extend($T::excluded_type_ids());)+
                ids
            }
        }
    };
}

impl_query_filter_tuple!(A);
impl_query_filter_tuple!(A, B);
impl_query_filter_tuple!(A, B, C);
impl_query_filter_tuple!(A, B, C, D);
impl_query_filter_tuple!(A, B, C, D, E);
impl_query_filter_tuple!(A, B, C, D, E, F);
impl_query_filter_tuple!(A, B, C, D, E, F, G);
impl_query_filter_tuple!(A, B, C, D, E, F, G, H);

/// Per-archetype fetch state and how to read `Self::Item` at a row, for
/// shared-borrow queries.
pub trait QueryFetch<'w>: QueryFilter {
    type Item;
    type State;

    fn prepare(archetype: &'w Archetype) -> Self::State;
    /// # Safety
    /// `row` must be `< archetype.len()` for the archetype `state` was
    /// prepared from.
    unsafe fn fetch(state: &Self::State, row: usize) -> Self::Item;
}

impl<'w> QueryFetch<'w> for EntityFetch {
    type Item = Entity;
    type State = &'w [Entity];
    fn prepare(archetype: &'w Archetype) -> Self::State {
        archetype.entities()
    }
    unsafe fn fetch(state: &Self::State, row: usize) -> Self::Item {
        state[row]
    }
}

impl<'w, T: Component> QueryFetch<'w> for &T {
    type Item = &'w T;
    type State = *const T;
    fn prepare(archetype: &'w Archetype) -> Self::State {
        archetype
            .get_column(TypeId::of::<T>())
            .expect("archetype matched but column missing")
            .as_ptr::<T>()
    }
    unsafe fn fetch(state: &Self::State, row: usize) -> Self::Item {
        &*state.add(row)
    }
}

impl<'w, T: Component> QueryFetch<'w> for With<T> {
    type Item = ();
    type State = ();
    fn prepare(_archetype: &'w Archetype) -> Self::State {}
    unsafe fn fetch(_state: &Self::State, _row: usize) -> Self::Item {}
}

impl<'w, T: Component> QueryFetch<'w> for Without<T> {
    type Item = ();
    type State = ();
    fn prepare(_archetype: &'w Archetype) -> Self::State {}
    unsafe fn fetch(_state: &Self::State, _row: usize) -> Self::Item {}
}

macro_rules! impl_query_fetch_tuple {
    ($($T:ident),+) => {
        impl<'w, $($T: QueryFetch<'w>),+> QueryFetch<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type State = ($($T::State,)+);

            fn prepare(archetype: &'w Archetype) -> Self::State {
                ($($T::prepare(archetype),)+)
            }

            #[allow(non_snake_case)]
            unsafe fn fetch(state: &Self::State, row: usize) -> Self::Item {
                let ($($T,)+) = state;
                ($($T::fetch($T, row),)+)
            }
        }
    };
}

impl_query_fetch_tuple!(A, B);
impl_query_fetch_tuple!(A, B, C);
impl_query_fetch_tuple!(A, B, C, D);

/// Per-archetype fetch state for exclusive-borrow queries. Distinct from
/// `QueryFetch` because two different component columns in the same row
/// must be independently mutably borrowed, which `&mut Archetype` alone
/// cannot express.
pub trait QueryFetchMut<'w>: QueryFilter {
    type Item;
    type State;

    fn prepare(archetype: &'w mut Archetype) -> Self::State;
    /// # Safety
    /// `row` must be `< archetype.len()`, and no two live `Item`s from the
    /// same `State` may alias the same row.
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Self::Item;
}

impl<'w> QueryFetchMut<'w> for EntityFetch {
    type Item = Entity;
    type State = &'w [Entity];
    fn prepare(archetype: &'w mut Archetype) -> Self::State {
        archetype.entities()
    }
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Self::Item {
        state[row]
    }
}

impl<'w, T: Component> QueryFetchMut<'w> for &T {
    type Item = &'w T;
    type State = *const T;
    fn prepare(archetype: &'w mut Archetype) -> Self::State {
        archetype
            .get_column_mut(TypeId::of::<T>())
            .expect("archetype matched but column missing")
            .as_mut_ptr::<T>() as *const T
    }
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Self::Item {
        &*state.add(row)
    }
}

impl<'w, T: Component> QueryFetchMut<'w> for &mut T {
    type Item = &'w mut T;
    type State = *mut T;
    fn prepare(archetype: &'w mut Archetype) -> Self::State {
        archetype
            .get_column_mut(TypeId::of::<T>())
            .expect("archetype matched but column missing")
            .as_mut_ptr::<T>()
    }
    unsafe fn fetch(state: &mut Self::State, row: usize) -> Self::Item {
        &mut *state.add(row)
    }
}

impl<'w, T: Component> QueryFetchMut<'w> for With<T> {
    type Item = ();
    type State = ();
    fn prepare(_archetype: &'w mut Archetype) -> Self::State {}
    unsafe fn fetch(_state: &mut Self::State, _row: usize) -> Self::Item {}
}

impl<'w, T: Component> QueryFetchMut<'w> for Without<T> {
    type Item = ();
    type State = ();
    fn prepare(_archetype: &'w mut Archetype) -> Self::State {}
    unsafe fn fetch(_state: &mut Self::State, _row: usize) -> Self::Item {}
}

macro_rules! impl_query_fetch_mut_tuple {
    ($($T:ident),+) => {
        impl<'w, $($T: QueryFetchMut<'w>),+> QueryFetchMut<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type State = ($($T::State,)+);

            fn prepare(archetype: &'w mut Archetype) -> Self::State {
                // SAFETY: each `$T::prepare` only touches its own column, so
                // calling them against the same `&mut Archetype` in sequence
                // via a raw re-borrow never produces aliasing mutable refs.
                let ptr = archetype as *mut Archetype;
                ($(unsafe { $T::prepare(&mut *ptr) },)+)
            }

            #[allow(non_snake_case)]
            unsafe fn fetch(state: &mut Self::State, row: usize) -> Self::Item {
                let ($($T,)+) = state;
                ($($T::fetch($T, row),)+)
            }
        }
    };
}

impl_query_fetch_mut_tuple!(A, B);
impl_query_fetch_mut_tuple!(A, B, C);
impl_query_fetch_mut_tuple!(A, B, C, D);

/// Iterator over a shared-borrow query's matches.
pub struct QueryIter<'w, Q: QueryFetch<'w>> {
    world: &'w World,
    matched: &'w [usize],
    archetype_cursor: usize,
    row_cursor: usize,
    state: Option<Q::State>,
    remaining: usize,
}

impl<'w, Q: QueryFetch<'w>> QueryIter<'w, Q> {
    pub(crate) fn new(world: &'w World, matched: &'w [usize]) -> Self {
        let remaining = matched
            .iter()
            .filter_map(|&id| world.get_archetype(id))
            .map(|a| a.len())
            .sum();
        Self {
            world,
            matched,
            archetype_cursor: 0,
            row_cursor: 0,
            state: None,
            remaining,
        }
    }

    fn current_archetype(&self) -> Option<&'w Archetype> {
        self.matched
            .get(self.archetype_cursor)
            .and_then(|&id| self.world.get_archetype(id))
    }
}

impl<'w, Q: QueryFetch<'w>> Iterator for QueryIter<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let archetype = self.current_archetype()?;
            if self.row_cursor >= archetype.len() {
                self.archetype_cursor += 1;
                self.row_cursor = 0;
                self.state = None;
                continue;
            }
            if self.state.is_none() {
                self.state = Some(Q::prepare(archetype));
            }
            let row = self.row_cursor;
            self.row_cursor += 1;
            self.remaining -= 1;
            let state = self.state.as_ref().unwrap();
            return Some(unsafe { Q::fetch(state, row) });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'w, Q: QueryFetch<'w>> ExactSizeIterator for QueryIter<'w, Q> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// Iterator over an exclusive-borrow query's matches. Each matched
/// archetype is visited once and fully consumed before the next.
pub struct QueryIterMut<'w, Q: QueryFetchMut<'w>> {
    archetypes: std::vec::IntoIter<&'w mut Archetype>,
    current: Option<(Q::State, usize, usize)>,
    remaining: usize,
}

impl<'w, Q: QueryFetchMut<'w>> QueryIterMut<'w, Q> {
    pub(crate) fn new(archetypes: Vec<&'w mut Archetype>) -> Self {
        let remaining = archetypes.iter().map(|a| a.len()).sum();
        Self {
            archetypes: archetypes.into_iter(),
            current: None,
            remaining,
        }
    }
}

impl<'w, Q: QueryFetchMut<'w>> Iterator for QueryIterMut<'w, Q> {
    type Item = Q::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((state, row, len)) = &mut self.current {
                if *row < *len {
                    let r = *row;
                    *row += 1;
                    self.remaining -= 1;
                    return Some(unsafe { Q::fetch(state, r) });
                }
                self.current = None;
            }
            let archetype = self.archetypes.next()?;
            let len = archetype.len();
            let state = Q::prepare(archetype);
            self.current = Some((state, 0, len));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'w, Q: QueryFetchMut<'w>> ExactSizeIterator for QueryIterMut<'w, Q> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// Shared-borrow query handle.
pub struct Query<'w, Q: QueryFilter + QueryFetch<'w>> {
    world: &'w World,
    matched: Vec<usize>,
    _marker: PhantomData<Q>,
}

impl<'w, Q: QueryFilter + QueryFetch<'w>> Query<'w, Q> {
    pub fn new(world: &'w World) -> Self {
        let matched = world.archetypes_matching(&Q::signature());
        Self {
            world,
            matched,
            _marker: PhantomData,
        }
    }

    pub fn iter(&'w self) -> QueryIter<'w, Q> {
        QueryIter::new(self.world, &self.matched)
    }

    pub fn count(&self) -> usize {
        self.matched
            .iter()
            .filter_map(|&id| self.world.get_archetype(id))
            .map(|a| a.len())
            .sum()
    }
}

/// Exclusive-borrow query handle.
pub struct QueryMut<'w, Q: QueryFilter + QueryFetchMut<'w>> {
    world: &'w mut World,
    _marker: PhantomData<Q>,
}

impl<'w, Q: QueryFilter + QueryFetchMut<'w>> QueryMut<'w, Q> {
    pub fn new(world: &'w mut World) -> Self {
        Self {
            world,
            _marker: PhantomData,
        }
    }

    pub fn iter_mut(&'w mut self) -> QueryIterMut<'w, Q> {
        let matched = self.world.archetypes_matching(&Q::signature());
        let archetypes = self.world.archetypes_mut(&matched);
        QueryIterMut::new(archetypes)
    }

    pub fn count(&self) -> usize {
        self.world
            .archetypes_matching(&Q::signature())
            .iter()
            .filter_map(|&id| self.world.get_archetype(id))
            .map(|a| a.len())
            .sum()
    }

    /// Split matched archetypes across rayon's pool, running `func` on each
    /// archetype's slice of items independently. Distinct archetypes never
    /// alias, so no cross-thread synchronization is needed beyond the join
    /// at the end of `for_each`.
    #[cfg(feature = "parallel")]
    pub fn par_for_each<F>(&'w mut self, func: F)
    where
        F: Fn(Q::Item) + Send + Sync,
        Q::Item: Send,
    {
        use rayon::prelude::*;

        let matched = self.world.archetypes_matching(&Q::signature());
        let archetypes = self.world.archetypes_mut(&matched);
        archetypes.into_par_iter().for_each(|archetype| {
            let len = archetype.len();
            let mut state = Q::prepare(archetype);
            for row in 0..len {
                func(unsafe { Q::fetch(&mut state, row) });
            }
        });
    }
}

/// Adapters this engine's query API specifies that `std::iter::Iterator`
/// doesn't already provide. Everything else — `filter`, `map`, `zip`,
/// `take_while`, `fold`, `partition`, `max_by_key`, ... — is used directly.
pub trait QueryIteratorExt: Iterator + Sized {
    /// True if no element satisfies `predicate` (the complement of `any`).
    fn none<P: FnMut(&Self::Item) -> bool>(mut self, mut predicate: P) -> bool {
        !self.any(|item| predicate(&item))
    }

    /// Count of elements satisfying `predicate`.
    fn count_if<P: FnMut(&Self::Item) -> bool>(self, mut predicate: P) -> usize {
        self.filter(|item| predicate(item)).count()
    }

    /// Overlapping windows of size `n`, collected eagerly (the source
    /// iterator need not be re-visitable).
    fn slide(self, n: usize) -> std::vec::IntoIter<Vec<Self::Item>>
    where
        Self::Item: Clone,
    {
        let items: Vec<Self::Item> = self.collect();
        if n == 0 || items.len() < n {
            return Vec::new().into_iter();
        }
        (0..=items.len() - n)
            .map(|start| items[start..start + n].to_vec())
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Every `n`th element, starting at the first.
    fn stride(self, n: usize) -> std::iter::StepBy<Self> {
        self.step_by(n.max(1))
    }

    /// Flatten one level of nested iterables lazily: each inner iterable's
    /// items are yielded in order, inner iterables back to back.
    fn join(self) -> std::iter::Flatten<Self>
    where
        Self::Item: IntoIterator,
    {
        self.flatten()
    }

    /// The first element satisfying `predicate`, by reference semantics
    /// matching `find` but named to mirror the adapter table this engine's
    /// query language specifies.
    fn find_first<P: FnMut(&Self::Item) -> bool>(mut self, mut predicate: P) -> Option<Self::Item> {
        self.find(|item| predicate(item))
    }

    /// Collect into any `FromIterator` target, avoiding a turbofish at the
    /// call site when the target is already implied by context.
    fn collect_with<B: FromIterator<Self::Item>>(self) -> B {
        self.collect()
    }

    /// Group elements by a derived key, preserving first-seen key order.
    fn group_by<K, F>(self, mut key_fn: F) -> Vec<(K, Vec<Self::Item>)>
    where
        K: Eq + std::hash::Hash + Clone,
        F: FnMut(&Self::Item) -> K,
    {
        let mut order: Vec<K> = Vec::new();
        let mut groups: std::collections::HashMap<K, Vec<Self::Item>> =
            std::collections::HashMap::new();
        for item in self {
            let key = key_fn(&item);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(item);
        }
        order
            .into_iter()
            .map(|k| {
                let items = groups.remove(&k).unwrap_or_default();
                (k, items)
            })
            .collect()
    }
}

impl<I: Iterator> QueryIteratorExt for I {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_complement_of_any() {
        let v = vec![1, 2, 3];
        assert!(v.iter().none(|&&x| x > 10));
        assert!(!v.into_iter().none(|&x| x > 2));
    }

    #[test]
    fn count_if_counts_matches() {
        let v = vec![1, 2, 3, 4, 5];
        assert_eq!(v.into_iter().count_if(|&x| x % 2 == 0), 2);
    }

    #[test]
    fn slide_produces_overlapping_windows() {
        let v = vec![1, 2, 3, 4];
        let windows: Vec<_> = v.into_iter().slide(2).collect();
        assert_eq!(windows, vec![vec![1, 2], vec![2, 3], vec![3, 4]]);
    }

    #[test]
    fn stride_skips_by_n() {
        let v = vec![0, 1, 2, 3, 4, 5];
        let strided: Vec<_> = v.into_iter().stride(2).collect();
        assert_eq!(strided, vec![0, 2, 4]);
    }

    #[test]
    fn group_by_preserves_first_seen_key_order() {
        let v = vec![1, 2, 3, 4, 5, 6];
        let groups = v.into_iter().group_by(|x| x % 3);
        assert_eq!(groups[0].0, 1);
        assert_eq!(groups[0].1, vec![1, 4]);
    }

    #[test]
    fn join_flattens_one_level() {
        let nested = vec![vec![1, 2], vec![3, 4], vec![5]];
        let flat: Vec<_> = nested.into_iter().join().collect();
        assert_eq!(flat, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn join_skips_empty_inner_vectors() {
        let nested: Vec<Vec<i32>> = vec![vec![], vec![1, 2], vec![], vec![3]];
        let flat: Vec<_> = nested.into_iter().join().collect();
        assert_eq!(flat, vec![1, 2, 3]);
    }

    #[test]
    fn join_of_empty_outer_vector_is_empty() {
        let nested: Vec<Vec<i32>> = vec![];
        let flat: Vec<_> = nested.into_iter().join().collect();
        assert!(flat.is_empty());
    }

    #[test]
    fn query_signature_matches_archetype() {
        let mut arch = Archetype::new(vec![TypeId::of::<i32>()]);
        arch.register_component::<i32>();
        assert!(<&i32 as QueryFilter>::matches_archetype(&arch));
        assert!(!<&f32 as QueryFilter>::matches_archetype(&arch));
    }
}
