//! # Archetype-Based ECS
//!
//! Entities are generational ids; their components live in archetype tables,
//! one per distinct component-type-set, with one dense column per type.
//! Queries match archetypes by required and excluded sets and walk their
//! columns directly.
//!
//! ## Module Overview
//!
//! - [`entity`] — Generational entity IDs
//! - [`component`] — Component type registry and type-erased columns
//! - [`archetype`] — Groups entities by component signature
//! - [`world`] — Central container (entities + components + resources)
//! - [`query`] — Closure-based iteration over matching archetypes
//! - [`commands`] — Deferred structural changes
//! - [`system`] — System trait and priority schedule
//! - [`hierarchy`] — Parent/child relations and transform propagation

pub mod archetype;
pub mod commands;
pub mod component;
pub mod entity;
pub mod hierarchy;
pub mod query;
pub mod system;
pub mod world;

pub use archetype::ArchetypeId;
pub use commands::Commands;
pub use component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
pub use entity::Entity;
pub use hierarchy::{
    Children, GlobalTransform, HierarchyError, HierarchyPlugin, Parent, propagate_transforms,
};
pub use query::{Query, QueryParam};
pub use system::{Schedule, System};
pub use world::{Bundle, EntityLocation, World};
