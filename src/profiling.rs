//! # Profiling Guide
//!
//! Enable the `profiling` feature in your Cargo.toml:
//!
//! ```toml
//! [dependencies]
//! relic-ecs = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! [`crate::executor::Executor`] always records per-system min/max/average
//! timing into a [`crate::executor::SystemProfiler`]; the `profiling`
//! feature additionally wires `tracing` spans around each stage so an
//! external subscriber (`tracing-subscriber`, `tracing-appender`, ...) can
//! capture them.
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//!
//! let subscriber = tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(tracing_subscriber::EnvFilter::from_default_env());
//! tracing::subscriber::set_global_default(subscriber).unwrap();
//! ```
//!
//! Profile in release mode for accurate numbers; `RUST_LOG=debug` surfaces
//! every span.

pub mod profiling_examples {
    /// A system that logs its own entity count on every run when the
    /// `profiling` feature is enabled.
    /// ```ignore
    /// use relic_ecs::{System, SystemContext, Result};
    /// use tracing::info_span;
    ///
    /// struct MovementSystem;
    ///
    /// impl System for MovementSystem {
    ///     fn run(&mut self, ctx: &mut SystemContext<'_>) -> Result<()> {
    ///         #[cfg(feature = "profiling")]
    ///         let _guard = info_span!(
    ///             "movement_system",
    ///             entity_count = ctx.world().entity_count()
    ///         )
    ///         .entered();
    ///
    ///         for (pos, vel) in ctx.world_mut().query_mut::<(&mut Position, &Velocity)>().iter() {
    ///             pos.x += vel.x;
    ///             pos.y += vel.y;
    ///         }
    ///         Ok(())
    ///     }
    ///
    ///     fn name(&self) -> &str { "MovementSystem" }
    ///     fn access(&self) -> relic_ecs::AccessPolicy {
    ///         relic_ecs::AccessPolicy::empty()
    ///             .reads_component::<Velocity>()
    ///             .writes_component::<Position>()
    ///     }
    /// }
    /// ```
    pub fn basic_system_profiling() {}

    /// Reading accumulated timing stats back out of the executor after a
    /// run, instead of (or alongside) a live `tracing` span.
    /// ```ignore
    /// use relic_ecs::{Executor, Schedule, SystemId, World};
    ///
    /// let mut schedule = Schedule::new();
    /// let mut world = World::new();
    /// let mut executor = Executor::new();
    /// executor.run(&mut schedule, &mut world)?;
    ///
    /// if let Some(stats) = executor.profiler().stats(SystemId(0)) {
    ///     tracing::info!(?stats.avg, ?stats.max, "movement_system timing");
    /// }
    /// # Ok::<(), relic_ecs::EcsError>(())
    /// ```
    pub fn reading_executor_stats() {}

    /// Spanning a whole frame's worth of schedules, with archetype-count
    /// context attached for correlating fragmentation with slow frames.
    /// ```ignore
    /// use relic_ecs::{App, ScheduleLabel};
    /// use tracing::info_span;
    ///
    /// fn frame(app: &mut App) -> relic_ecs::Result<()> {
    ///     #[cfg(feature = "profiling")]
    ///     let _guard = info_span!(
    ///         "frame",
    ///         archetype_count = app.world().archetype_count()
    ///     )
    ///     .entered();
    ///
    ///     app.update()
    /// }
    /// ```
    pub fn frame_level_profiling() {}
}
