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

//! Error types

use std::any::TypeId;
use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity not found (dead or never existed)
    EntityNotFound,

    /// Component not present on the queried entity/archetype
    ComponentNotFound,

    /// Archetype not found
    ArchetypeNotFound,

    /// Invalid entity handle
    InvalidEntity,

    /// Command buffer error
    CommandError(String),

    /// System dependency cycle detected; names the systems on the cycle
    SystemCycleDetected(Vec<String>),

    /// Schedule configuration error (unknown system/set referenced by an
    /// ordering constraint, duplicate registration, etc.)
    ScheduleError(String),

    /// Referenced system not found in a schedule
    SystemNotFound,

    /// Resource not found
    ResourceNotFound(String),

    /// Batch spawn size too large (possible misuse/DoS)
    BatchTooLarge,

    /// `init_resource`/non-Try `InsertResource` failed: already present
    ResourceAlreadyExists(TypeId),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "entity not found"),
            EcsError::ComponentNotFound => write!(f, "component not found"),
            EcsError::ArchetypeNotFound => write!(f, "archetype not found"),
            EcsError::InvalidEntity => write!(f, "invalid entity handle"),
            EcsError::CommandError(msg) => write!(f, "command error: {msg}"),
            EcsError::SystemCycleDetected(cycle) => {
                write!(f, "system dependency cycle detected: {}", cycle.join(" -> "))
            }
            EcsError::ScheduleError(msg) => write!(f, "schedule error: {msg}"),
            EcsError::SystemNotFound => write!(f, "system not found"),
            EcsError::ResourceNotFound(msg) => write!(f, "resource not found: {msg}"),
            EcsError::BatchTooLarge => write!(f, "batch size too large (max 10,000,000)"),
            EcsError::ResourceAlreadyExists(type_id) => {
                write!(f, "resource already exists: {type_id:?}")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
