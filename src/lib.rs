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

//! relic-ecs - archetype-based Entity Component System with a parallel
//! system scheduler.
//!
//! Entities are handles into dense, Structure-of-Arrays archetype storage;
//! systems declare their data access up front so the scheduler can run
//! non-conflicting systems concurrently and merge their deferred commands
//! and events deterministically at each barrier.

pub mod app;
pub mod archetype;
pub mod bitset;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod event;
pub mod executor;
pub mod prelude;
pub mod profiling;
pub mod query;
pub mod resource;
pub mod schedule;
pub mod system;
pub mod world;

pub use app::{App, AppExitCode, ExtractFn, SubApp};
pub use archetype::{Archetype, ArchetypeSignature, ComponentColumn};
pub use bitset::BitSet;
pub use command::{EntityCmdBuffer, EntityCmdBufferHandle, WorldCmdBuffer};
pub use component::{Bundle, Component};
pub use entity::{Entity, EntityAllocator, EntityLocation};
pub use error::{EcsError, Result};
pub use event::{EventReader, EventRegistry, EventWriter, LocalEventBuffer, LocalEventWriter};
pub use executor::{Executor, SystemProfiler, SystemStats};
pub use query::{
    EntityFetch, Query, QueryFetch, QueryFetchMut, QueryFilter, QueryIteratorExt, QueryMut, With,
    Without,
};
pub use resource::ResourceRegistry;
pub use schedule::{Schedule, ScheduleLabel, Stage};
pub use system::{AccessPolicy, BoxedSystem, System, SystemConfig, SystemContext, SystemId, SystemLabel};
pub use world::World;
