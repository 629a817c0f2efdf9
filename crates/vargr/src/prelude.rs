//! Convenience re-exports — `use vargr::prelude::*` for the common items.

pub use crate::app::{App, AppExit, Phase, Plugin};
pub use crate::config::{EngineConfig, QuadtreeConfig};
pub use crate::ecs::{
    Bundle, Children, Commands, Entity, GlobalTransform, HierarchyError, HierarchyPlugin, Parent,
    Query, Schedule, System, World, propagate_transforms,
};
pub use crate::math::{Affine2, Mat2, Rect, Transform2d, Vec2};
pub use crate::spatial::{
    BroadPhase, BroadPhasePlugin, Collider, CollisionPairs, LooseQuadtree, Shape, ViewRect,
    VisibleSet,
};
pub use crate::time::{FixedTime, Time};
#[cfg(feature = "diagnostics")]
pub use crate::diag::DiagSnapshot;
