//! Spatial indexing: a loose quadtree and the collision broad phase built on it.

pub mod broad_phase;
pub mod quadtree;

pub use broad_phase::{
    BroadPhase, BroadPhasePlugin, Collider, CollisionPairs, Shape, ViewRect, VisibleSet,
    compute_collision_pairs, cull_visible, sync_broad_phase,
};
pub use quadtree::{ElementHandle, LooseQuadtree, QuadtreeStats};
