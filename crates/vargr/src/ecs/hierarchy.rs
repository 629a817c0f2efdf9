//! # Entity Hierarchies — Parent/Child Relationships
//!
//! Provides [`Parent`], [`Children`], and [`GlobalTransform`] components for
//! expressing entity hierarchies and propagating transforms from parent to child.
//!
//! ## Usage
//!
//! ```ignore
//! let parent = world.spawn((Transform2d::from_xy(100.0, 50.0),));
//! let child = world.spawn_child(parent, (Transform2d::from_xy(10.0, 0.0),));
//!
//! // After propagation the child's GlobalTransform is parent * child.
//! propagate_transforms(&mut world);
//! ```
//!
//! ## Relations
//!
//! A child's [`Parent`] is mirrored by exactly one entry in its parent's
//! [`Children`], and the graph never has a cycle: [`World::attach_child`]
//! checks both before touching anything. Relations store entity ids, resolved
//! again on each access. Despawning an entity orphans its children; they
//! stay alive as roots.
//!
//! ## Incremental Propagation
//!
//! Every global transform carries a dirty flag. A pass runs in two steps:
//!
//! ```text
//! flood:     dirty Transform2d / dirty GlobalTransform ──► whole subtree dirty
//! recompute: for each dirty global, climb to the nearest clean ancestor,
//!            then walk back down computing parent * local
//! ```
//!
//! Clean subtrees are never touched. Entity locations looked up during a pass
//! go through a [`RelationCache`], which is discarded as soon as the world's
//! structure epoch moves.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::component::ComponentId;
use super::entity::Entity;
use super::world::{Bundle, EntityLocation, World};
use crate::app::{App, Phase, Plugin};
use crate::math::{Affine2, Transform2d, Vec2};

/// Marks an entity as a child of another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent(pub Entity);

/// The child entities of a parent, in attach order (until a detach swaps one
/// out).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Children(pub Vec<Entity>);

/// The world-space transform computed by [`propagate_transforms`].
///
/// For roots this equals the local [`Transform2d`] matrix; for children it is
/// `parent_global * child_local`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform {
    matrix: Affine2,
    dirty: bool,
}

impl GlobalTransform {
    /// A global transform waiting for its first propagation.
    pub fn dirty() -> Self {
        Self {
            matrix: Affine2::IDENTITY,
            dirty: true,
        }
    }

    pub fn matrix(&self) -> Affine2 {
        self.matrix
    }

    pub fn translation(&self) -> Vec2 {
        self.matrix.translation
    }

    pub fn transform_point(&self, point: Vec2) -> Vec2 {
        self.matrix.transform_point2(point)
    }

    /// Whether the cached matrix is out of date.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for GlobalTransform {
    fn default() -> Self {
        Self::dirty()
    }
}

/// Rejected relation change. Nothing was modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyError {
    /// An entity cannot be its own parent.
    SelfAttach(Entity),
    /// `parent` is already a descendant of `child`.
    Cycle { parent: Entity, child: Entity },
    /// One of the endpoints was despawned.
    DeadEntity(Entity),
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyError::SelfAttach(e) => write!(f, "cannot attach {e:?} to itself"),
            HierarchyError::Cycle { parent, child } => write!(
                f,
                "attaching {child:?} under {parent:?} would create a cycle"
            ),
            HierarchyError::DeadEntity(e) => write!(f, "entity {e:?} is not alive"),
        }
    }
}

impl std::error::Error for HierarchyError {}

impl World {
    /// Make `child` a child of `parent`, detaching it from any previous
    /// parent first. Attaching to the current parent again is a no-op.
    pub fn attach_child(&mut self, parent: Entity, child: Entity) -> Result<(), HierarchyError> {
        self.check_alive(parent)?;
        self.check_alive(child)?;
        if parent == child {
            return Err(HierarchyError::SelfAttach(child));
        }
        if self.is_descendant(parent, child) {
            return Err(HierarchyError::Cycle { parent, child });
        }

        match self.parent_of(child) {
            Some(current) if current == parent => return Ok(()),
            Some(previous) => self.unlink_from_children(previous, child),
            None => {}
        }
        self.link(parent, child);
        Ok(())
    }

    /// Detach `child` from `parent`; the child becomes a root.
    ///
    /// Returns `Ok(false)` if `child` was not a child of `parent`.
    pub fn detach_child(&mut self, parent: Entity, child: Entity) -> Result<bool, HierarchyError> {
        self.check_alive(parent)?;
        self.check_alive(child)?;
        if self.parent_of(child) != Some(parent) {
            return Ok(false);
        }
        self.unlink_from_children(parent, child);
        self.remove_component::<Parent>(child);
        self.mark_subtree_dirty(child);
        Ok(true)
    }

    pub fn has_parent(&self, entity: Entity) -> bool {
        self.has::<Parent>(entity)
    }

    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        self.try_get::<Parent>(entity).map(|p| p.0)
    }

    /// Direct children of `entity`; empty for leaves and stale handles.
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.try_get::<Children>(entity)
            .map(|c| c.0.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `ancestor` appears on the parent chain above `entity`.
    pub fn is_descendant(&self, entity: Entity, ancestor: Entity) -> bool {
        let mut current = self.parent_of(entity);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent_of(p);
        }
        false
    }

    /// Spawn a child entity under a parent.
    ///
    /// # Panics
    ///
    /// Panics if the parent entity is not alive.
    pub fn spawn_child<B: Bundle>(&mut self, parent: Entity, bundle: B) -> Entity {
        assert!(
            self.is_alive(parent),
            "Cannot spawn child on dead parent {:?}",
            parent
        );
        let child = self.spawn(bundle);
        self.link(parent, child);
        child
    }

    /// Despawn an entity and all its descendants.
    ///
    /// Returns `false` if the entity was already dead.
    pub fn despawn_recursive(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let mut subtree = vec![entity];
        let mut i = 0;
        while i < subtree.len() {
            subtree.extend_from_slice(self.children(subtree[i]));
            i += 1;
        }
        // Deepest first, so no entity is orphaned on the way down.
        for e in subtree.into_iter().rev() {
            self.despawn(e);
        }
        true
    }

    /// Cut `entity` out of the relation graph before it is despawned: leave
    /// the parent's `Children`, and orphan every child.
    pub(crate) fn detach_relations(&mut self, entity: Entity) {
        if let Some(parent) = self.parent_of(entity) {
            self.unlink_from_children(parent, entity);
        }
        let children = self.children(entity).to_vec();
        for child in children {
            self.remove_component::<Parent>(child);
            self.mark_subtree_dirty(child);
        }
    }

    /// Flag the global transform of `entity` and every descendant as stale.
    pub(crate) fn mark_subtree_dirty(&mut self, entity: Entity) {
        let mut stack = vec![entity];
        while let Some(e) = stack.pop() {
            if let Some(global) = self.try_get_mut::<GlobalTransform>(e) {
                global.dirty = true;
            }
            stack.extend_from_slice(self.children(e));
        }
    }

    fn check_alive(&self, entity: Entity) -> Result<(), HierarchyError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(HierarchyError::DeadEntity(entity))
        }
    }

    /// `child` must currently be a root.
    fn link(&mut self, parent: Entity, child: Entity) {
        self.insert(child, Parent(parent));
        match self.try_get_mut::<Children>(parent) {
            Some(children) => children.0.push(child),
            None => {
                self.add_component(parent, Children(vec![child]));
            }
        }
        self.mark_subtree_dirty(child);
    }

    /// Remove `child` from `parent`'s list, dropping the component once empty.
    fn unlink_from_children(&mut self, parent: Entity, child: Entity) {
        let Some(children) = self.try_get_mut::<Children>(parent) else {
            return;
        };
        if let Some(pos) = children.0.iter().position(|&c| c == child) {
            children.0.swap_remove(pos);
        }
        if children.0.is_empty() {
            self.remove_component::<Children>(parent);
        }
    }
}

/// Entity → location lookups reused across propagation passes while the
/// world's structure is unchanged.
#[derive(Default)]
pub struct RelationCache {
    epoch: u64,
    locations: HashMap<Entity, EntityLocation>,
}

impl RelationCache {
    /// Drop every cached location if the world changed shape since they were
    /// recorded.
    pub fn sync(&mut self, world: &World) {
        let epoch = world.structure_epoch();
        if self.epoch != epoch {
            self.locations.clear();
            self.epoch = epoch;
        }
    }

    pub fn locate(&mut self, world: &World, entity: Entity) -> Option<EntityLocation> {
        if let Some(&loc) = self.locations.get(&entity) {
            return Some(loc);
        }
        let loc = world.location(entity)?;
        self.locations.insert(entity, loc);
        Some(loc)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

struct TransformIds {
    local: ComponentId,
    global: ComponentId,
    parent: ComponentId,
}

/// Propagate local transforms down the entity hierarchy.
///
/// - Every entity with a [`Transform2d`] gets a [`GlobalTransform`] if it has
///   none yet.
/// - Dirtiness floods from changed local transforms (and globals already
///   marked by relation changes) through all descendants.
/// - Each dirty global is recomputed as `parent_global * local`, parents
///   first. Entities without a `Transform2d` act as the identity.
pub fn propagate_transforms(world: &mut World) {
    let missing = world
        .query::<&Transform2d>()
        .without::<GlobalTransform>()
        .entities();
    for entity in missing {
        world.add_component(entity, GlobalTransform::dirty());
    }

    flood_dirty_transforms(world);
    recompute_dirty_transforms(world);
}

fn flood_dirty_transforms(world: &mut World) {
    let mut stack = Vec::new();
    world
        .query::<&Transform2d>()
        .each(|entity, local| {
            if local.is_dirty() {
                stack.push(entity);
            }
        });
    world
        .query::<&GlobalTransform>()
        .each(|entity, global| {
            if global.dirty {
                stack.push(entity);
            }
        });

    let mut visited = HashSet::new();
    while let Some(entity) = stack.pop() {
        if !visited.insert(entity) {
            continue;
        }
        if let Some(global) = world.try_get_mut::<GlobalTransform>(entity) {
            global.dirty = true;
        }
        stack.extend_from_slice(world.children(entity));
    }
}

fn recompute_dirty_transforms(world: &mut World) {
    let ids = TransformIds {
        local: world.register_component::<Transform2d>(),
        global: world.register_component::<GlobalTransform>(),
        parent: world.register_component::<Parent>(),
    };

    let mut dirty = Vec::new();
    world.query::<&GlobalTransform>().each(|entity, global| {
        if global.dirty {
            dirty.push(entity);
        }
    });
    if dirty.is_empty() {
        return;
    }

    let mut cache = world.resource_remove::<RelationCache>().unwrap_or_default();
    cache.sync(world);
    for entity in dirty {
        resolve_global(world, &mut cache, &ids, entity);
    }
    log::trace!("transform pass touched {} cached locations", cache.len());
    world.insert_resource(cache);
}

/// Climb from `entity` to the nearest clean global (or a root), then compute
/// every dirty global on the way back down.
fn resolve_global(world: &mut World, cache: &mut RelationCache, ids: &TransformIds, entity: Entity) {
    let mut chain = Vec::new();
    let mut base = Affine2::IDENTITY;
    let mut current = Some(entity);
    while let Some(e) = current {
        let Some(loc) = cache.locate(world, e) else {
            break;
        };
        match world.component_at::<GlobalTransform>(loc, ids.global) {
            Some(global) if !global.dirty => {
                base = global.matrix;
                break;
            }
            Some(_) => chain.push(loc),
            // No global: passes the parent's transform through.
            None => {}
        }
        current = world.component_at::<Parent>(loc, ids.parent).map(|p| p.0);
    }

    for loc in chain.into_iter().rev() {
        let local = world
            .component_at_mut::<Transform2d>(loc, ids.local)
            .map(|t| t.local_matrix())
            .unwrap_or(Affine2::IDENTITY);
        base = base * local;
        if let Some(global) = world.component_at_mut::<GlobalTransform>(loc, ids.global) {
            global.matrix = base;
            global.dirty = false;
        }
    }
}

/// Runs [`propagate_transforms`] at the start of `PostUpdate`.
pub struct HierarchyPlugin;

/// Priority of transform propagation within `PostUpdate`.
pub const PROPAGATE_PRIORITY: i32 = 0;

impl Plugin for HierarchyPlugin {
    fn build(&self, app: &mut App) {
        app.add_system_with_priority(Phase::PostUpdate, PROPAGATE_PRIORITY, propagate_transforms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn root_gets_global_transform() {
        let mut world = World::new();
        let root = world.spawn((Transform2d::from_xy(10.0, 20.0),));

        propagate_transforms(&mut world);

        let gt = world.get::<GlobalTransform>(root);
        assert!(!gt.is_dirty());
        assert!(close(gt.translation(), Vec2::new(10.0, 20.0)));
    }

    #[test]
    fn relations_are_reciprocal() {
        let mut world = World::new();
        let parent = world.spawn_empty();
        let a = world.spawn_child(parent, ());
        let b = world.spawn_empty();
        world.attach_child(parent, b).unwrap();

        assert_eq!(world.children(parent), &[a, b]);
        assert_eq!(world.parent_of(a), Some(parent));
        assert!(world.has_parent(b));
        assert!(!world.has_parent(parent));

        assert_eq!(world.detach_child(parent, a), Ok(true));
        assert_eq!(world.detach_child(parent, a), Ok(false));
        assert_eq!(world.children(parent), &[b]);
        assert!(!world.has_parent(a));
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut world = World::new();
        let a = world.spawn_empty();
        let b = world.spawn_child(a, ());
        let c = world.spawn_child(b, ());
        let epoch = world.structure_epoch();

        assert_eq!(
            world.attach_child(c, a),
            Err(HierarchyError::Cycle { parent: c, child: a })
        );
        assert_eq!(world.attach_child(a, a), Err(HierarchyError::SelfAttach(a)));

        assert_eq!(world.structure_epoch(), epoch);
        assert!(!world.has_parent(a));
        assert_eq!(world.children(c), &[] as &[Entity]);
        assert!(world.is_descendant(c, a));
        assert!(!world.is_descendant(a, c));
    }

    #[test]
    fn dead_endpoints_are_rejected() {
        let mut world = World::new();
        let a = world.spawn_empty();
        let b = world.spawn_empty();
        world.despawn(b);
        assert_eq!(world.attach_child(a, b), Err(HierarchyError::DeadEntity(b)));
        assert_eq!(world.detach_child(b, a), Err(HierarchyError::DeadEntity(b)));
    }

    #[test]
    fn reparenting_moves_the_child() {
        let mut world = World::new();
        let first = world.spawn_empty();
        let second = world.spawn_empty();
        let child = world.spawn_child(first, ());

        world.attach_child(second, child).unwrap();
        world.attach_child(second, child).unwrap();

        assert_eq!(world.parent_of(child), Some(second));
        assert_eq!(world.children(second), &[child]);
        assert!(!world.has::<Children>(first));
    }

    #[test]
    fn three_level_chain_propagates() {
        let mut world = World::new();
        let a = world.spawn((Transform2d::from_xy(1.0, 0.0),));
        let b = world.spawn_child(a, (Transform2d::from_xy(2.0, 0.0),));
        let c = world.spawn_child(b, (Transform2d::from_xy(3.0, 0.0),));

        propagate_transforms(&mut world);
        assert!(close(world.get::<GlobalTransform>(c).translation(), Vec2::new(6.0, 0.0)));

        world.get_mut::<Transform2d>(a).set_position(Vec2::new(10.0, 5.0));
        flood_dirty_transforms(&mut world);
        assert!(world.get::<GlobalTransform>(b).is_dirty());
        assert!(world.get::<GlobalTransform>(c).is_dirty());

        recompute_dirty_transforms(&mut world);
        let gc = world.get::<GlobalTransform>(c);
        assert!(!gc.is_dirty());
        assert!(close(gc.translation(), Vec2::new(15.0, 5.0)));
    }

    #[test]
    fn clean_subtrees_are_left_alone() {
        let mut world = World::new();
        let a = world.spawn((Transform2d::from_xy(1.0, 0.0),));
        let b = world.spawn((Transform2d::from_xy(2.0, 0.0),));
        let b_child = world.spawn_child(b, (Transform2d::from_xy(1.0, 1.0),));
        propagate_transforms(&mut world);

        world.get_mut::<Transform2d>(a).translate(Vec2::new(1.0, 0.0));
        flood_dirty_transforms(&mut world);
        assert!(world.get::<GlobalTransform>(a).is_dirty());
        assert!(!world.get::<GlobalTransform>(b).is_dirty());
        assert!(!world.get::<GlobalTransform>(b_child).is_dirty());
    }

    #[test]
    fn rotation_and_origin_compose() {
        let mut world = World::new();
        let parent = world.spawn((Transform2d::from_xy(100.0, 0.0)
            .with_rotation(std::f32::consts::FRAC_PI_2),));
        let child = world.spawn_child(parent, (Transform2d::from_xy(10.0, 0.0),));

        propagate_transforms(&mut world);
        // (10, 0) rotated a quarter turn is (0, 10).
        assert!(close(
            world.get::<GlobalTransform>(child).translation(),
            Vec2::new(100.0, 10.0)
        ));
    }

    #[test]
    fn grouping_entity_without_transform_passes_through() {
        let mut world = World::new();
        let root = world.spawn((Transform2d::from_xy(5.0, 5.0),));
        let group = world.spawn_child(root, ());
        let leaf = world.spawn_child(group, (Transform2d::from_xy(1.0, 0.0),));

        propagate_transforms(&mut world);
        assert!(close(world.get::<GlobalTransform>(leaf).translation(), Vec2::new(6.0, 5.0)));
        assert!(!world.has::<GlobalTransform>(group));
    }

    #[test]
    fn despawn_orphans_children() {
        let mut world = World::new();
        let parent = world.spawn((Transform2d::from_xy(50.0, 0.0),));
        let child = world.spawn_child(parent, (Transform2d::from_xy(1.0, 0.0),));
        propagate_transforms(&mut world);

        world.despawn(parent);
        assert!(world.is_alive(child));
        assert!(!world.has_parent(child));
        assert!(world.get::<GlobalTransform>(child).is_dirty());

        propagate_transforms(&mut world);
        assert!(close(world.get::<GlobalTransform>(child).translation(), Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn despawning_a_child_updates_the_parent() {
        let mut world = World::new();
        let parent = world.spawn_empty();
        let a = world.spawn_child(parent, ());
        let b = world.spawn_child(parent, ());

        world.despawn(a);
        assert_eq!(world.children(parent), &[b]);
        world.despawn(b);
        assert!(!world.has::<Children>(parent));
    }

    #[test]
    fn despawn_recursive_removes_subtree() {
        let mut world = World::new();
        let parent = world.spawn((Transform2d::default(),));
        let child1 = world.spawn_child(parent, (Transform2d::default(),));
        let grandchild = world.spawn_child(child1, (Transform2d::default(),));
        let child2 = world.spawn_child(parent, (Transform2d::default(),));

        assert!(world.despawn_recursive(child1));
        assert!(!world.is_alive(grandchild));
        assert_eq!(world.children(parent), &[child2]);

        assert!(world.despawn_recursive(parent));
        assert_eq!(world.entity_count(), 0);
        assert!(!world.despawn_recursive(parent));
    }

    #[test]
    fn duplicate_joins_the_same_parent() {
        let mut world = World::new();
        let parent = world.spawn((Transform2d::default(),));
        let child = world.spawn_child(parent, (Transform2d::from_xy(3.0, 0.0),));
        let _grandchild = world.spawn_child(child, ());

        let copy = world.duplicate(child);
        assert_eq!(world.parent_of(copy), Some(parent));
        assert_eq!(world.children(parent), &[child, copy]);
        assert!(world.children(copy).is_empty());
    }

    #[test]
    fn relation_cache_follows_structure_epoch() {
        let mut world = World::new();
        let e = world.spawn((Transform2d::default(),));
        let mut cache = RelationCache::default();
        cache.sync(&world);
        assert_eq!(cache.locate(&world, e), world.location(e));
        assert_eq!(cache.len(), 1);

        cache.sync(&world);
        assert_eq!(cache.len(), 1);

        world.spawn_empty();
        cache.sync(&world);
        assert!(cache.is_empty());
    }
}
