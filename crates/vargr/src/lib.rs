//! # Vargr — 2D Engine Core
//!
//! An archetype ECS, a parent/child transform hierarchy and a loose-quadtree
//! broad phase, driven by a fixed-step app loop. Rendering, input and physics
//! response are left to the host.
//!
//! Start with `use vargr::prelude::*` and build an [`App`](app::App).

pub mod app;
pub mod config;
pub mod ecs;
pub mod math;
pub mod prelude;
pub mod spatial;
pub mod time;

#[cfg(feature = "diagnostics")]
pub mod diag;
