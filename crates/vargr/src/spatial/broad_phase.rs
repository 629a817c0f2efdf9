//! # Broad Phase — Candidate Pairs and Culling
//!
//! Each entity with a [`Collider`] and a [`GlobalTransform`] gets a proxy in a
//! [`LooseQuadtree`]. The proxy stores a "fat" box, the tight world bounds
//! inflated by a margin. As long as the tight box stays inside the fat one,
//! moving the entity costs nothing; only when it escapes is the proxy erased
//! and reinserted.
//!
//! ```text
//! PostUpdate:
//!   propagate_transforms   (0)   GlobalTransform up to date
//!   sync_broad_phase       (10)  proxies follow colliders, periodic cleanup
//!   compute_collision_pairs(20)  CollisionPairs resource
//!   cull_visible           (30)  VisibleSet resource (if a ViewRect exists)
//! ```
//!
//! Pairs are only candidates: their boxes overlap. Narrow-phase tests and
//! collision response are up to the caller.

use std::collections::HashMap;

use super::quadtree::{ElementHandle, LooseQuadtree, QuadtreeStats};
use crate::app::{App, Phase, Plugin};
use crate::config::EngineConfig;
use crate::ecs::{Entity, GlobalTransform, World};
use crate::math::{Rect, Vec2};

/// Collision shape in the entity's local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Rect { half_extents: Vec2 },
    Circle { radius: f32 },
}

/// Shape attached to an entity, offset from its origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub shape: Shape,
    pub offset: Vec2,
}

impl Collider {
    pub fn rect(width: f32, height: f32) -> Self {
        Self {
            shape: Shape::Rect {
                half_extents: Vec2::new(width, height) * 0.5,
            },
            offset: Vec2::ZERO,
        }
    }

    pub fn circle(radius: f32) -> Self {
        Self {
            shape: Shape::Circle { radius },
            offset: Vec2::ZERO,
        }
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    /// World-space bounding box under `global`.
    pub fn world_bounds(&self, global: &GlobalTransform) -> Rect {
        let matrix = global.matrix();
        match self.shape {
            Shape::Rect { half_extents } => {
                Rect::from_center_half_extents(self.offset, half_extents).transformed(&matrix)
            }
            Shape::Circle { radius } => {
                let center = matrix.transform_point2(self.offset);
                let scale = matrix
                    .matrix2
                    .x_axis
                    .length()
                    .max(matrix.matrix2.y_axis.length());
                Rect::from_center_half_extents(center, Vec2::splat(radius * scale))
            }
        }
    }
}

struct Proxy {
    handle: ElementHandle,
    fat: Rect,
    tight: Rect,
    seen: u64,
}

/// Spatial index of collider proxies. Inserted as a resource by
/// [`BroadPhasePlugin`].
pub struct BroadPhase {
    tree: LooseQuadtree<Entity>,
    proxies: HashMap<Entity, Proxy>,
    margin: f32,
    cleanup_interval: u32,
    frame: u64,
    reinserts_this_frame: usize,
}

impl BroadPhase {
    pub fn new(bounds: Rect, max_depth: u32, max_elements: usize, margin: f32) -> Self {
        Self {
            tree: LooseQuadtree::new(bounds, max_depth, max_elements),
            proxies: HashMap::new(),
            margin: margin.max(0.0),
            cleanup_interval: 0,
            frame: 0,
            reinserts_this_frame: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let q = &config.quadtree;
        let mut bp = Self::new(q.bounds, q.max_depth, q.max_elements, config.broad_phase_margin);
        bp.cleanup_interval = config.cleanup_interval;
        bp
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Number of proxies.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.proxies.contains_key(&entity)
    }

    /// Tight bounds last reported for `entity`.
    pub fn bounds_of(&self, entity: Entity) -> Option<Rect> {
        self.proxies.get(&entity).map(|p| p.tight)
    }

    /// Proxies reinserted since the last sync started.
    pub fn reinserts_this_frame(&self) -> usize {
        self.reinserts_this_frame
    }

    pub fn tree(&self) -> &LooseQuadtree<Entity> {
        &self.tree
    }

    pub fn stats(&self) -> QuadtreeStats {
        self.tree.stats()
    }

    /// Create or move `entity`'s proxy. Returns `true` if the quadtree had to
    /// be touched (new proxy, or the box left its fat bounds).
    pub fn update_proxy(&mut self, entity: Entity, tight: Rect) -> bool {
        let seen = self.frame;
        if let Some(proxy) = self.proxies.get_mut(&entity) {
            proxy.tight = tight;
            proxy.seen = seen;
            if proxy.fat.contains_rect(&tight) {
                return false;
            }
            self.tree.erase(proxy.handle);
        }
        let fat = tight.inflate(self.margin);
        let handle = self.tree.insert(entity, fat);
        self.proxies.insert(
            entity,
            Proxy {
                handle,
                fat,
                tight,
                seen,
            },
        );
        self.reinserts_this_frame += 1;
        true
    }

    pub fn remove_proxy(&mut self, entity: Entity) -> bool {
        match self.proxies.remove(&entity) {
            Some(proxy) => self.tree.erase(proxy.handle),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.proxies.clear();
        self.tree.clear();
    }

    /// Entities whose tight bounds overlap `area`, sorted.
    pub fn query_rect(&self, area: Rect) -> Vec<Entity> {
        let mut out = Vec::new();
        self.tree.for_each_in_rect(area, |_, &entity, _| {
            if self.tight(entity).overlaps(&area) {
                out.push(entity);
            }
        });
        out.sort_unstable();
        out
    }

    /// Entities whose tight bounds contain `point`, sorted.
    pub fn query_point(&self, point: Vec2) -> Vec<Entity> {
        let mut out = Vec::new();
        self.tree.for_each_at_point(point, |_, &entity, _| {
            if self.tight(entity).contains_point(point) {
                out.push(entity);
            }
        });
        out.sort_unstable();
        out
    }

    /// Every pair of proxies whose tight bounds overlap, each pair once with
    /// the smaller entity first, sorted.
    pub fn candidate_pairs(&self) -> Vec<(Entity, Entity)> {
        let mut pairs = Vec::new();
        for (&a, proxy) in &self.proxies {
            self.tree.for_each_in_rect(proxy.tight, |_, &b, _| {
                if a < b && self.tight(b).overlaps(&proxy.tight) {
                    pairs.push((a, b));
                }
            });
        }
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    fn tight(&self, entity: Entity) -> Rect {
        self.proxies
            .get(&entity)
            .map(|p| p.tight)
            .unwrap_or(Rect::EMPTY)
    }

    /// Start a sync pass.
    fn begin_frame(&mut self) {
        self.frame += 1;
        self.reinserts_this_frame = 0;
    }

    /// Drop proxies not updated since [`begin_frame`](Self::begin_frame) and
    /// run the periodic cleanup. Returns how many proxies were dropped.
    fn end_frame(&mut self) -> usize {
        let frame = self.frame;
        let stale: Vec<Entity> = self
            .proxies
            .iter()
            .filter(|(_, p)| p.seen != frame)
            .map(|(&e, _)| e)
            .collect();
        for &entity in &stale {
            self.remove_proxy(entity);
        }
        if self.cleanup_interval > 0 && frame % u64::from(self.cleanup_interval) == 0 {
            self.tree.cleanup();
        }
        stale.len()
    }
}

/// Area to cull against, usually the camera's view in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRect(pub Rect);

/// Entities whose colliders overlap the [`ViewRect`], sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleSet(pub Vec<Entity>);

/// Overlapping collider pairs from the latest broad-phase pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionPairs(pub Vec<(Entity, Entity)>);

/// Mirror every collider into the [`BroadPhase`]. Colliders that disappeared
/// (despawned, or lost their component) lose their proxy.
pub fn sync_broad_phase(world: &mut World) {
    if !world.has_resource::<BroadPhase>() {
        return;
    }
    world.resource_scope::<BroadPhase, _>(|world, bp| {
        bp.begin_frame();
        world
            .query::<(&Collider, &GlobalTransform)>()
            .each(|entity, (collider, global)| {
                bp.update_proxy(entity, collider.world_bounds(global));
            });
        let dropped = bp.end_frame();
        log::trace!(
            "broad phase: {} proxies, {} reinserted, {} dropped",
            bp.len(),
            bp.reinserts_this_frame(),
            dropped
        );
    });
}

pub fn compute_collision_pairs(world: &mut World) {
    let Some(bp) = world.get_resource::<BroadPhase>() else {
        return;
    };
    let pairs = bp.candidate_pairs();
    world.insert_resource(CollisionPairs(pairs));
}

pub fn cull_visible(world: &mut World) {
    let (Some(bp), Some(view)) = (
        world.get_resource::<BroadPhase>(),
        world.get_resource::<ViewRect>(),
    ) else {
        return;
    };
    let visible = bp.query_rect(view.0);
    world.insert_resource(VisibleSet(visible));
}

pub const SYNC_PRIORITY: i32 = 10;
pub const PAIRS_PRIORITY: i32 = 20;
pub const CULL_PRIORITY: i32 = 30;

/// Inserts a [`BroadPhase`] built from the app's [`EngineConfig`] and
/// schedules the broad-phase systems after transform propagation.
pub struct BroadPhasePlugin;

impl Plugin for BroadPhasePlugin {
    fn build(&self, app: &mut App) {
        let bp = BroadPhase::from_config(app.config());
        let world = app.world_mut();
        world.insert_resource(bp);
        world.insert_resource(CollisionPairs::default());
        world.insert_resource(VisibleSet::default());
        app.add_system_with_priority(Phase::PostUpdate, SYNC_PRIORITY, sync_broad_phase);
        app.add_system_with_priority(Phase::PostUpdate, PAIRS_PRIORITY, compute_collision_pairs);
        app.add_system_with_priority(Phase::PostUpdate, CULL_PRIORITY, cull_visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::propagate_transforms;
    use crate::math::Transform2d;

    fn bp() -> BroadPhase {
        BroadPhase::new(Rect::from_xywh(-500.0, -500.0, 1000.0, 1000.0), 6, 4, 5.0)
    }

    fn entities(world: &mut World, n: usize) -> Vec<Entity> {
        (0..n).map(|_| world.spawn_empty()).collect()
    }

    #[test]
    fn small_moves_stay_in_fat_bounds() {
        let mut world = World::new();
        let e = entities(&mut world, 1)[0];
        let mut bp = bp();

        assert!(bp.update_proxy(e, Rect::from_xywh(0.0, 0.0, 10.0, 10.0)));
        assert!(!bp.update_proxy(e, Rect::from_xywh(3.0, -2.0, 10.0, 10.0)));
        assert!(bp.update_proxy(e, Rect::from_xywh(30.0, 0.0, 10.0, 10.0)));
        assert_eq!(bp.tree().len(), 1);
        assert_eq!(bp.bounds_of(e), Some(Rect::from_xywh(30.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn queries_use_tight_bounds() {
        let mut world = World::new();
        let e = entities(&mut world, 1)[0];
        let mut bp = bp();
        bp.update_proxy(e, Rect::from_xywh(0.0, 0.0, 10.0, 10.0));

        assert_eq!(bp.query_point(Vec2::new(5.0, 5.0)), vec![e]);
        // Inside the fat box, outside the tight one.
        assert!(bp.query_point(Vec2::new(12.0, 5.0)).is_empty());
        assert!(bp.query_rect(Rect::from_xywh(11.0, 0.0, 2.0, 2.0)).is_empty());
    }

    #[test]
    fn candidate_pairs_match_brute_force() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut world = World::new();
        let es = entities(&mut world, 120);
        let mut bp = bp();
        let mut rects = Vec::new();
        for &e in &es {
            let rect = Rect::from_xywh(
                rng.gen_range(-450.0..400.0),
                rng.gen_range(-450.0..400.0),
                rng.gen_range(1.0..50.0),
                rng.gen_range(1.0..50.0),
            );
            bp.update_proxy(e, rect);
            rects.push((e, rect));
        }

        let mut expected = Vec::new();
        for (i, (a, ra)) in rects.iter().enumerate() {
            for (b, rb) in &rects[i + 1..] {
                if ra.overlaps(rb) {
                    expected.push(((*a).min(*b), (*a).max(*b)));
                }
            }
        }
        expected.sort_unstable();
        assert_eq!(bp.candidate_pairs(), expected);
    }

    #[test]
    fn removed_proxies_leave_the_tree() {
        let mut world = World::new();
        let es = entities(&mut world, 2);
        let mut bp = bp();
        bp.update_proxy(es[0], Rect::from_xywh(0.0, 0.0, 10.0, 10.0));
        bp.update_proxy(es[1], Rect::from_xywh(5.0, 5.0, 10.0, 10.0));
        assert_eq!(bp.candidate_pairs(), vec![(es[0], es[1])]);

        assert!(bp.remove_proxy(es[0]));
        assert!(!bp.remove_proxy(es[0]));
        assert!(bp.candidate_pairs().is_empty());
        assert_eq!(bp.tree().len(), 1);
    }

    #[test]
    fn circle_bounds_follow_scale() {
        let mut world = World::new();
        let e = world.spawn((Transform2d::from_xy(10.0, 0.0).with_scale(2.0),));
        propagate_transforms(&mut world);
        let bounds = Collider::circle(3.0).world_bounds(world.get::<GlobalTransform>(e));
        assert!((bounds.min - Vec2::new(4.0, -6.0)).length() < 1e-4);
        assert!((bounds.max - Vec2::new(16.0, 6.0)).length() < 1e-4);
    }

    #[test]
    fn systems_track_colliders_and_view() {
        let mut world = World::new();
        world.insert_resource(bp());
        world.insert_resource(ViewRect(Rect::from_xywh(-20.0, -20.0, 40.0, 40.0)));

        let a = world.spawn((Transform2d::from_xy(0.0, 0.0), Collider::rect(10.0, 10.0)));
        let b = world.spawn((Transform2d::from_xy(6.0, 0.0), Collider::rect(10.0, 10.0)));
        let far = world.spawn((Transform2d::from_xy(300.0, 0.0), Collider::circle(4.0)));

        let frame = |world: &mut World| {
            propagate_transforms(world);
            sync_broad_phase(world);
            compute_collision_pairs(world);
            cull_visible(world);
        };

        frame(&mut world);
        assert_eq!(world.resource::<CollisionPairs>().0, vec![(a, b)]);
        assert_eq!(world.resource::<VisibleSet>().0, vec![a, b]);
        assert_eq!(world.resource::<BroadPhase>().len(), 3);

        world.get_mut::<Transform2d>(far).set_position(Vec2::new(8.0, 8.0));
        world.despawn(a);
        frame(&mut world);
        assert_eq!(world.resource::<CollisionPairs>().0, vec![(b, far)]);
        assert_eq!(world.resource::<VisibleSet>().0, vec![b, far]);
        assert!(!world.resource::<BroadPhase>().contains(a));
    }
}
