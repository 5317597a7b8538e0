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

//! `App`: owns a main [`SubApp`] and zero or more named secondary sub-apps,
//! drives the `Startup -> (PreUpdate, Update, PostUpdate loop) -> Shutdown`
//! state machine, and runs an `Extract` hook plus each secondary sub-app's
//! own schedules after the main sub-app completes its frame.

use std::collections::VecDeque;
use std::thread::JoinHandle;

use ahash::AHashMap;

use crate::error::Result;
use crate::executor::Executor;
use crate::schedule::{Schedule, ScheduleLabel};
use crate::system::BoxedSystem;
use crate::world::World;

/// Process-level exit code, the only status `Run()` reports to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppExitCode {
    Success = 0,
    Failure = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// A user-provided hook copying data from the main world into a secondary
/// sub-app's world before that sub-app's schedules run.
pub type ExtractFn = Box<dyn Fn(&World, &mut World) + Send + Sync>;

/// An independent world plus its own Startup/PreUpdate/Update/PostUpdate/
/// Shutdown schedules, run downstream of the main app each frame.
pub struct SubApp {
    pub world: World,
    schedules: AHashMap<ScheduleLabel, Schedule>,
    executor: Executor,
    extract: Option<ExtractFn>,
    overlap_cap: usize,
    in_flight: VecDeque<JoinHandle<Result<(World, AHashMap<ScheduleLabel, Schedule>, Executor)>>>,
    startup_ran: bool,
}

impl SubApp {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            schedules: AHashMap::default(),
            executor: Executor::new(),
            extract: None,
            overlap_cap: 0,
            in_flight: VecDeque::new(),
            startup_ran: false,
        }
    }

    pub fn add_system(&mut self, label: ScheduleLabel, system: BoxedSystem) -> &mut Self {
        self.schedules.entry(label).or_default().add_system(system);
        self
    }

    pub fn set_extract(&mut self, extract: ExtractFn) -> &mut Self {
        self.extract = Some(extract);
        self
    }

    /// Allow up to `cap` of this sub-app's frames to be outstanding at once;
    /// a new frame only blocks on the oldest once `cap` is reached.
    pub fn allow_overlapping_updates(&mut self, cap: usize) -> &mut Self {
        self.overlap_cap = cap;
        self
    }

    fn run_schedule(&mut self, label: ScheduleLabel) -> Result<()> {
        if let Some(schedule) = self.schedules.get_mut(&label) {
            self.executor.run(schedule, &mut self.world)?;
        }
        self.world.update();
        Ok(())
    }

    fn run_startup_once(&mut self) -> Result<()> {
        if !self.startup_ran {
            self.run_schedule(ScheduleLabel::STARTUP)?;
            self.startup_ran = true;
        }
        Ok(())
    }

    fn run_frame_inline(&mut self) -> Result<()> {
        self.run_startup_once()?;
        self.run_schedule(ScheduleLabel::PRE_UPDATE)?;
        self.run_schedule(ScheduleLabel::UPDATE)?;
        self.run_schedule(ScheduleLabel::POST_UPDATE)?;
        Ok(())
    }

    /// Drain one outstanding overlapped frame, folding its (possibly
    /// mutated) world/schedules/executor back into `self`.
    fn join_oldest(&mut self) -> Result<()> {
        if let Some(handle) = self.in_flight.pop_front() {
            let (world, schedules, executor) = handle
                .join()
                .unwrap_or_else(|_| Err(crate::error::EcsError::CommandError(
                    "sub-app frame thread panicked".into(),
                )))?;
            self.world = world;
            self.schedules = schedules;
            self.executor = executor;
        }
        Ok(())
    }

    /// Run one frame, respecting the overlap cap: if `overlap_cap == 0` this
    /// runs inline and returns only once the frame has fully completed; with
    /// a nonzero cap, the frame is launched on its own thread and this
    /// returns immediately once fewer than `cap` frames are outstanding.
    fn run_frame(&mut self) -> Result<()> {
        if self.overlap_cap == 0 {
            return self.run_frame_inline();
        }

        if self.in_flight.len() >= self.overlap_cap {
            self.join_oldest()?;
        }

        self.run_startup_once()?;
        let mut world = std::mem::replace(&mut self.world, World::new());
        let mut schedules = std::mem::take(&mut self.schedules);
        let mut executor = std::mem::replace(&mut self.executor, Executor::new());

        let handle = std::thread::spawn(move || -> Result<(World, AHashMap<ScheduleLabel, Schedule>, Executor)> {
            for label in [ScheduleLabel::PRE_UPDATE, ScheduleLabel::UPDATE, ScheduleLabel::POST_UPDATE] {
                if let Some(schedule) = schedules.get_mut(&label) {
                    executor.run(schedule, &mut world)?;
                }
                world.update();
            }
            Ok((world, schedules, executor))
        });
        self.in_flight.push_back(handle);
        Ok(())
    }

    fn run_shutdown(&mut self) -> Result<()> {
        while !self.in_flight.is_empty() {
            self.join_oldest()?;
        }
        self.run_schedule(ScheduleLabel::SHUTDOWN)
    }
}

impl Default for SubApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Composition root: a main [`SubApp`] plus zero or more named secondary
/// sub-apps, each extracted-into and run after the main sub-app's frame.
pub struct App {
    main: SubApp,
    sub_apps: AHashMap<String, SubApp>,
    state: AppState,
}

impl App {
    pub fn new() -> Self {
        Self {
            main: SubApp::new(),
            sub_apps: AHashMap::default(),
            state: AppState::Uninitialized,
        }
    }

    pub fn world(&self) -> &World {
        &self.main.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.main.world
    }

    pub fn add_system(&mut self, label: ScheduleLabel, system: BoxedSystem) -> &mut Self {
        self.main.add_system(label, system);
        self
    }

    pub fn insert_resource<R: std::any::Any + Send + Sync>(&mut self, resource: R) -> &mut Self {
        self.main.world.insert_resource(resource);
        self
    }

    /// Add a named secondary sub-app, given its extraction hook.
    pub fn add_sub_app(&mut self, name: impl Into<String>, extract: ExtractFn) -> &mut Self {
        let mut sub_app = SubApp::new();
        sub_app.set_extract(extract);
        self.sub_apps.insert(name.into(), sub_app);
        self
    }

    pub fn sub_app_mut(&mut self, name: &str) -> Option<&mut SubApp> {
        self.sub_apps.get_mut(name)
    }

    /// `Uninitialized -> Initialized`: runs the main sub-app's `Startup`
    /// schedule. Fatal (precondition violation) to call twice.
    pub fn initialize(&mut self) -> Result<()> {
        assert_eq!(
            self.state,
            AppState::Uninitialized,
            "App::initialize called more than once"
        );
        self.main.run_startup_once()?;
        self.state = AppState::Initialized;
        Ok(())
    }

    /// Run exactly one frame: the main sub-app's `PreUpdate`/`Update`/
    /// `PostUpdate`, then extract-and-run every secondary sub-app in
    /// registration order.
    pub fn update(&mut self) -> Result<()> {
        if self.state == AppState::Uninitialized {
            self.initialize()?;
        }
        self.state = AppState::Running;

        self.main.run_schedule(ScheduleLabel::PRE_UPDATE)?;
        self.main.run_schedule(ScheduleLabel::UPDATE)?;
        self.main.run_schedule(ScheduleLabel::POST_UPDATE)?;

        for sub_app in self.sub_apps.values_mut() {
            if let Some(extract) = &sub_app.extract {
                extract(&self.main.world, &mut sub_app.world);
            }
            sub_app.run_frame()?;
        }
        Ok(())
    }

    /// Drive the frame loop until `should_stop` returns true, then run every
    /// sub-app's `Shutdown` schedule once.
    pub fn run_until(&mut self, mut should_stop: impl FnMut(&App) -> bool) -> AppExitCode {
        loop {
            if let Err(err) = self.update() {
                eprintln!("system-level failure: {err}");
                let _ = self.shutdown();
                return AppExitCode::Failure;
            }
            if should_stop(self) {
                break;
            }
        }
        match self.shutdown() {
            Ok(()) => AppExitCode::Success,
            Err(err) => {
                eprintln!("shutdown failure: {err}");
                AppExitCode::Failure
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.main.run_shutdown()?;
        for sub_app in self.sub_apps.values_mut() {
            sub_app.run_shutdown()?;
        }
        self.state = AppState::Stopped;
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as EcsResult;
    use crate::system::{AccessPolicy, System, SystemContext};

    struct FrameCounter;
    impl System for FrameCounter {
        fn run(&mut self, ctx: &mut SystemContext<'_>) -> EcsResult<()> {
            let world = ctx.world_mut();
            if !world.has_resource::<u32>() {
                world.insert_resource(0u32);
            }
            *world.resource_mut::<u32>().unwrap() += 1;
            Ok(())
        }
        fn name(&self) -> &str {
            "FrameCounter"
        }
        fn access(&self) -> AccessPolicy {
            AccessPolicy::empty().writes_resource::<u32>()
        }
    }

    #[test]
    fn update_runs_startup_once_then_increments_each_frame() {
        let mut app = App::new();
        app.add_system(ScheduleLabel::UPDATE, Box::new(FrameCounter));
        app.update().unwrap();
        app.update().unwrap();
        app.update().unwrap();
        assert_eq!(*app.world().resource::<u32>().unwrap(), 3);
    }

    #[test]
    fn sub_app_extract_copies_from_main_world() {
        let mut app = App::new();
        app.world_mut().insert_resource(42u32);
        app.add_sub_app(
            "render",
            Box::new(|main, sub| {
                if let Some(&v) = main.resource::<u32>() {
                    sub.insert_resource(v);
                }
            }),
        );
        app.update().unwrap();
        let sub_app = app.sub_app_mut("render").unwrap();
        assert_eq!(*sub_app.world.resource::<u32>().unwrap(), 42);
    }

    #[test]
    fn shutdown_transitions_state_and_runs_shutdown_schedule() {
        let mut app = App::new();
        app.update().unwrap();
        app.shutdown().unwrap();
        assert_eq!(app.state, AppState::Stopped);
    }
}
