//! App builder, plugins and the frame loop.
//!
//! The [`App`] owns the [`World`] and one [`Schedule`] per [`Phase`]. Each
//! call to [`App::tick`] runs one frame:
//!
//! ```text
//! Startup      (first tick only)
//! PreUpdate
//! FixedUpdate  × n   n from the FixedTime accumulator, clamped
//! Update
//! PostUpdate         transform propagation, broad phase
//! ```
//!
//! Queued [`Commands`](crate::ecs::Commands) are applied after every phase,
//! and after every fixed step.
//!
//! ## Example
//!
//! ```no_run
//! use vargr::prelude::*;
//!
//! let mut app = App::new();
//! app.with_config(EngineConfig::default())
//!     .add_plugin(HierarchyPlugin)
//!     .add_plugin(BroadPhasePlugin)
//!     .add_system(Phase::Update, |world: &mut World| {
//!         if world.resource::<Time>().frame_count() == 600 {
//!             world.insert_resource(AppExit);
//!         }
//!     });
//! app.run();
//! ```

use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::ecs::system::{Schedule, System};
use crate::ecs::world::World;
use crate::time::{FixedTime, Time};

/// Frame phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Startup,
    PreUpdate,
    FixedUpdate,
    Update,
    PostUpdate,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Startup,
        Phase::PreUpdate,
        Phase::FixedUpdate,
        Phase::Update,
        Phase::PostUpdate,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Insert this resource to make [`App::run`] return after the current frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppExit;

/// A plugin can add resources, systems, and other configuration to the app.
pub trait Plugin {
    fn build(&self, app: &mut App);
}

pub struct App {
    world: World,
    schedules: [Schedule; 5],
    config: EngineConfig,
    started: bool,
}

impl App {
    /// Create an app with the default config and the core resources
    /// ([`Time`], [`FixedTime`], [`EngineConfig`]).
    pub fn new() -> Self {
        let mut app = Self {
            world: World::new(),
            schedules: Default::default(),
            config: EngineConfig::default(),
            started: false,
        };
        app.apply_config();
        app.world.insert_resource(Time::new());
        app
    }

    /// Replace the engine config. Call this before adding plugins that read
    /// it, such as [`BroadPhasePlugin`](crate::spatial::BroadPhasePlugin).
    /// Out-of-range values are clamped the same way [`EngineConfig::from_json`]
    /// clamps them.
    pub fn with_config(&mut self, config: EngineConfig) -> &mut Self {
        self.config = config.sanitized();
        self.apply_config();
        self
    }

    fn apply_config(&mut self) {
        let config = &self.config;
        self.world.set_par_chunk_size(config.par_chunk_size);
        self.world
            .insert_resource(FixedTime::new(config.fixed_step(), config.max_fixed_steps));
        self.world.insert_resource(config.clone());
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn insert_resource<T: 'static + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.world.insert_resource(value);
        self
    }

    pub fn add_plugin<P: Plugin>(&mut self, plugin: P) -> &mut Self {
        log::debug!("adding plugin {}", std::any::type_name::<P>());
        plugin.build(self);
        self
    }

    /// Add a system to `phase` at priority 0.
    pub fn add_system<S: System + 'static>(&mut self, phase: Phase, system: S) -> &mut Self {
        self.schedules[phase.index()].add_system(system);
        self
    }

    /// Add a system to `phase`. Lower priorities run first.
    pub fn add_system_with_priority<S: System + 'static>(
        &mut self,
        phase: Phase,
        priority: i32,
        system: S,
    ) -> &mut Self {
        self.schedules[phase.index()].add_system_with_priority(priority, system);
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn schedule(&self, phase: Phase) -> &Schedule {
        &self.schedules[phase.index()]
    }

    /// Run one frame that took `delta`.
    pub fn tick(&mut self, delta: Duration) {
        if !self.started {
            self.started = true;
            self.run_phase(Phase::Startup);
        }

        match self.world.get_resource_mut::<Time>() {
            Some(time) => time.advance(delta),
            None => {
                let mut time = Time::new();
                time.advance(delta);
                self.world.insert_resource(time);
            }
        }

        self.run_phase(Phase::PreUpdate);

        let steps = match self.world.get_resource_mut::<FixedTime>() {
            Some(fixed) => fixed.accumulate(delta),
            None => 0,
        };
        for _ in 0..steps {
            self.run_phase(Phase::FixedUpdate);
        }

        self.run_phase(Phase::Update);
        self.run_phase(Phase::PostUpdate);
    }

    fn run_phase(&mut self, phase: Phase) {
        self.schedules[phase.index()].run(&mut self.world);
        self.world.flush_commands();
    }

    /// Tick with wall-clock deltas until an [`AppExit`] resource appears.
    /// Returns the number of frames run.
    pub fn run(&mut self) -> u64 {
        let mut frames = 0;
        let mut last = Instant::now();
        while !self.world.has_resource::<AppExit>() {
            let now = Instant::now();
            self.tick(now - last);
            last = now;
            frames += 1;
        }
        log::info!("app exited after {} frames", frames);
        frames
    }

    /// Gather a diagnostics snapshot for the frame just run. Resets the
    /// world's per-frame spawn counters.
    #[cfg(feature = "diagnostics")]
    pub fn diagnostics_snapshot(&mut self) -> crate::diag::DiagSnapshot {
        let systems = Phase::ALL
            .iter()
            .flat_map(|&phase| self.schedules[phase.index()].timings().iter().cloned())
            .collect();
        crate::diag::snapshot(&mut self.world, systems)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
