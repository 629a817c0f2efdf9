//! # System — Functions That Operate on the World
//!
//! A system is just a function that takes `&mut World` and does something with
//! it: query entities, modify components, read resources.
//!
//! ## Ordering
//!
//! A [`Schedule`] holds the systems of one frame phase. Each system has an
//! integer priority; lower priorities run first and equal priorities run in
//! registration order, so the order is fully deterministic. There is no
//! automatic parallelism between systems. Data parallelism inside a system
//! goes through [`Query::par_each`](super::query::Query::par_each).

use super::world::World;

/// A system that can be executed on a [`World`].
///
/// Any `FnMut(&mut World)` implements this trait, so you can use closures or
/// function pointers directly.
pub trait System {
    fn run(&mut self, world: &mut World);
}

impl<F: FnMut(&mut World)> System for F {
    fn run(&mut self, world: &mut World) {
        (self)(world);
    }
}

struct NamedSystem {
    #[cfg(any(feature = "diagnostics", test))]
    name: String,
    priority: i32,
    system: Box<dyn System>,
}

/// Wall time of one system during the most recent [`Schedule::run`].
#[cfg(feature = "diagnostics")]
#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemTiming {
    pub name: String,
    pub priority: i32,
    pub duration_us: f64,
}

/// Priority-ordered list of systems.
pub struct Schedule {
    systems: Vec<NamedSystem>,
    #[cfg(feature = "diagnostics")]
    pub(crate) timings: Vec<SystemTiming>,
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            #[cfg(feature = "diagnostics")]
            timings: Vec::new(),
        }
    }

    /// Add a system at priority 0.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        self.add_system_with_priority(0, system);
    }

    /// Add a system. It runs after every system with a lower priority and
    /// after systems of the same priority added before it.
    pub fn add_system_with_priority<S: System + 'static>(&mut self, priority: i32, system: S) {
        let at = self.systems.partition_point(|s| s.priority <= priority);
        self.systems.insert(
            at,
            NamedSystem {
                #[cfg(any(feature = "diagnostics", test))]
                name: short_system_name(std::any::type_name::<S>()),
                priority,
                system: Box::new(system),
            },
        );
    }

    /// Run all systems in order on the given world.
    pub fn run(&mut self, world: &mut World) {
        #[cfg(feature = "diagnostics")]
        {
            self.timings.clear();
            for ns in &mut self.systems {
                let start = std::time::Instant::now();
                ns.system.run(world);
                self.timings.push(SystemTiming {
                    name: ns.name.clone(),
                    priority: ns.priority,
                    duration_us: start.elapsed().as_secs_f64() * 1_000_000.0,
                });
            }
        }
        #[cfg(not(feature = "diagnostics"))]
        {
            for ns in &mut self.systems {
                ns.system.run(world);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    #[cfg(feature = "diagnostics")]
    pub fn timings(&self) -> &[SystemTiming] {
        &self.timings
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Last path segment of a system's type name (`game::movement` →
/// `movement`); closures become `<closure>`.
#[cfg(any(feature = "diagnostics", test))]
fn short_system_name(full: &str) -> String {
    let name = full.rsplit("::").next().unwrap_or(full);
    if name.contains("closure") {
        "<closure>".to_string()
    } else {
        name.to_string()
    }
}
