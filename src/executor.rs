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

//! Drives a `Schedule` to completion: one rayon `par_iter` pass per stage,
//! a command-merge barrier between stages, and per-system timing stats.
//!
//! # Safety architecture
//!
//! `execute_stage` runs every system in a stage concurrently and hands each
//! one a [`SystemContext`] built from a raw pointer to the world. This is
//! sound under the same invariants `SystemContext` documents:
//!
//! ## Invariant 1: non-overlapping declared access
//! `Schedule` only ever places two systems in the same stage when their
//! `AccessPolicy`s don't conflict (no shared component/resource write, no
//! shared event-queue write, no commands on either side). That check runs
//! once at schedule-build time, not per frame.
//!
//! ## Invariant 2: valid, unique system indices
//! `stage.systems` holds `SystemId`s produced by the same `Schedule` that
//! owns the backing `Vec<BoxedSystem>`; each id appears in at most one stage
//! per rebuild and indexes within bounds by construction.
//!
//! ## Invariant 3: no reference escapes the stage
//! The raw world pointer and each system's `SystemContext` live only for the
//! duration of the `par_iter` closure; the merge barrier that follows runs
//! single-threaded after every thread in the stage has joined.
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::command::WorldCmdBuffer;
use crate::error::Result;
use crate::event::LocalEventBuffer;
use crate::schedule::Schedule;
use crate::system::{SystemContext, SystemId};
use crate::world::World;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Min/max/average wall time and call count for one system, accumulated
/// across a run.
#[derive(Debug, Clone, Copy)]
pub struct SystemStats {
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
    pub call_count: u64,
}

impl SystemStats {
    fn record(&mut self, duration: Duration) {
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.total += duration;
        self.call_count += 1;
    }

    pub fn avg(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total / self.call_count as u32
        }
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self {
            min: Duration::MAX,
            max: Duration::ZERO,
            total: Duration::ZERO,
            call_count: 0,
        }
    }
}

/// Per-`SystemId` timing history, gated behind the `profiling` feature at
/// the call sites that record into it (see `world.rs`/`app.rs`).
#[derive(Default)]
pub struct SystemProfiler {
    stats: FxHashMap<SystemId, SystemStats>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: SystemId, duration: Duration) {
        self.stats.entry(id).or_default().record(duration);
    }

    pub fn stats(&self, id: SystemId) -> Option<SystemStats> {
        self.stats.get(&id).copied()
    }

    pub fn clear(&mut self) {
        self.stats.clear();
    }
}

/// Runs one `Schedule` against one `World`, stage by stage.
#[derive(Default)]
pub struct Executor {
    profiler: SystemProfiler,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiler(&self) -> &SystemProfiler {
        &self.profiler
    }

    /// Run every stage of `schedule` against `world` in order, merging
    /// deferred commands at the barrier between stages.
    pub fn run(&mut self, schedule: &mut Schedule, world: &mut World) -> Result<()> {
        schedule.ensure_built()?;
        let stage_count = schedule.stage_count();

        for stage_idx in 0..stage_count {
            let system_ids = schedule.stage_plan()[stage_idx].systems.clone();
            let (cmd_buffers, event_buffers) = self.execute_stage(&system_ids, schedule, world)?;
            world.merge_command_buffers(cmd_buffers)?;
            world.merge_event_buffers(event_buffers);
        }

        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn execute_stage(
        &mut self,
        system_ids: &[SystemId],
        schedule: &mut Schedule,
        world: &mut World,
    ) -> Result<(Vec<WorldCmdBuffer>, Vec<LocalEventBuffer>)> {
        // Opaque usize handles cross the rayon closure boundary; each thread
        // dereferences a disjoint element, never racing with another.
        let systems_ptr = schedule as *mut Schedule as usize;
        let world_ptr = world as *mut World as usize;

        type StageResult = Result<(SystemId, WorldCmdBuffer, LocalEventBuffer, Duration)>;
        let results: Vec<StageResult> = system_ids
            .par_iter()
            .map(|&id| {
                let schedule = unsafe { &mut *(systems_ptr as *mut Schedule) };
                let world = unsafe { &mut *(world_ptr as *mut World) };
                let system = schedule.system_mut_by_id(id);

                let start = std::time::Instant::now();
                // SAFETY: see module documentation — `id` belongs to a stage
                // whose member access policies are pairwise non-conflicting.
                let mut ctx = unsafe { SystemContext::new(world) };
                system.run(&mut ctx)?;
                let elapsed = start.elapsed();
                let (commands, events) = ctx.finish();
                Ok((id, commands, events, elapsed))
            })
            .collect();

        let mut buffers = Vec::with_capacity(results.len());
        for result in results {
            let (id, commands, events, elapsed) = result?;
            self.profiler.record(id, elapsed);
            buffers.push((id, commands, events));
        }
        // FIFO by SystemId, i.e. registration order, so merge order is
        // deterministic regardless of thread completion order.
        buffers.sort_by_key(|(id, _, _)| *id);
        let (commands, events) = buffers.into_iter().map(|(_, c, e)| (c, e)).unzip();
        Ok((commands, events))
    }

    #[cfg(not(feature = "parallel"))]
    fn execute_stage(
        &mut self,
        system_ids: &[SystemId],
        schedule: &mut Schedule,
        world: &mut World,
    ) -> Result<(Vec<WorldCmdBuffer>, Vec<LocalEventBuffer>)> {
        let mut cmd_buffers = Vec::with_capacity(system_ids.len());
        let mut event_buffers = Vec::with_capacity(system_ids.len());
        for &id in system_ids {
            let system = schedule.system_mut_by_id(id);
            let start = std::time::Instant::now();
            let mut ctx = unsafe { SystemContext::new(world) };
            system.run(&mut ctx)?;
            self.profiler.record(id, start.elapsed());
            let (commands, events) = ctx.finish();
            cmd_buffers.push(commands);
            event_buffers.push(events);
        }
        Ok((cmd_buffers, event_buffers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{AccessPolicy, System};

    struct CountingSystem;
    impl System for CountingSystem {
        fn run(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
            let _ = ctx.world();
            Ok(())
        }
        fn name(&self) -> &str {
            "CountingSystem"
        }
        fn access(&self) -> AccessPolicy {
            AccessPolicy::empty()
        }
    }

    #[test]
    fn run_executes_every_stage() {
        let mut schedule = Schedule::new();
        schedule.add_system(Box::new(CountingSystem));
        schedule.add_system(Box::new(CountingSystem));
        let mut world = World::new();
        let mut executor = Executor::new();
        executor.run(&mut schedule, &mut world).unwrap();
        assert_eq!(executor.profiler().stats(SystemId(0)).unwrap().call_count, 1);
        assert_eq!(executor.profiler().stats(SystemId(1)).unwrap().call_count, 1);
    }
}
