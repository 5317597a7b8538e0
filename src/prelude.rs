//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use relic_ecs::prelude::*;
//! ```

pub use crate::app::{App, AppExitCode, SubApp};
pub use crate::command::{EntityCmdBuffer, EntityCmdBufferHandle, WorldCmdBuffer};
pub use crate::component::{Bundle, Component};
pub use crate::entity::Entity;
pub use crate::error::{EcsError, Result};
pub use crate::event::{EventReader, EventWriter, LocalEventBuffer, LocalEventWriter};
pub use crate::executor::Executor;
pub use crate::query::{
    EntityFetch, Query, QueryFetch, QueryFetchMut, QueryFilter, QueryIteratorExt, QueryMut, With,
    Without,
};
pub use crate::schedule::{Schedule, ScheduleLabel};
pub use crate::system::{AccessPolicy, BoxedSystem, System, SystemConfig, SystemContext, SystemId};
pub use crate::world::World;
