//! # World — The Central Container
//!
//! The [`World`] owns all entities, components, and resources. It's the single
//! source of truth for the simulation state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ World                                                    │
//! │                                                          │
//! │  allocator: generational entity ids                      │
//! │  components: ComponentRegistry (type → ComponentId)      │
//! │                                                          │
//! │  archetypes: Vec<Archetype>        [0] = empty set       │
//! │  archetype_lookup: sorted ids → index into `archetypes`  │
//! │                                                          │
//! │  locations: Vec<EntityLocation>                          │
//! │    entity index → (archetype index, row)                 │
//! │                                                          │
//! │  resources: HashMap<TypeId, Box<dyn Any>>                │
//! │  commands: deferred structural changes                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Migration
//!
//! Adding or removing a component changes an entity's type-set, so its row
//! moves to another archetype: every shared column value is moved over, the
//! old row is swap-removed, and the entity that filled the hole gets its row
//! fixed up. The transition is cached on the source archetype as an edge.
//!
//! Every structural change (spawn, despawn, migration) bumps
//! [`World::structure_epoch`]. Anything that caches locations compares epochs
//! before trusting its cache.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::archetype::{Archetype, pair_mut};
use super::commands::Commands;
use super::component::{Component, ComponentId, ComponentRegistry};
use super::entity::{Entity, EntityAllocator};
use super::hierarchy::{Children, GlobalTransform, Parent};
use super::query::{DEFAULT_PAR_CHUNK, Query, QueryParam};
use crate::math::Transform2d;

/// Where an entity's row currently lives.
///
/// Only valid until the next structural change; compare
/// [`World::structure_epoch`] before reusing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EntityLocation {
    pub(crate) archetype: usize,
    pub(crate) row: usize,
}

impl EntityLocation {
    pub fn archetype(&self) -> usize {
        self.archetype
    }

    pub fn row(&self) -> usize {
        self.row
    }
}

/// The central container for all simulation state.
pub struct World {
    allocator: EntityAllocator,
    components: ComponentRegistry,
    archetypes: Vec<Archetype>,
    archetype_lookup: HashMap<Vec<ComponentId>, usize>,
    /// Indexed by entity slot. Entries for dead slots are stale and never read.
    locations: Vec<EntityLocation>,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    commands: Commands,
    structure_epoch: u64,
    par_chunk_size: usize,
    #[cfg(feature = "diagnostics")]
    spawned_this_frame: u32,
    #[cfg(feature = "diagnostics")]
    despawned_this_frame: u32,
}

impl World {
    pub fn new() -> Self {
        let mut world = Self {
            allocator: EntityAllocator::new(),
            components: ComponentRegistry::new(),
            archetypes: Vec::new(),
            archetype_lookup: HashMap::new(),
            locations: Vec::new(),
            resources: HashMap::new(),
            commands: Commands::new(),
            structure_epoch: 0,
            par_chunk_size: DEFAULT_PAR_CHUNK,
            #[cfg(feature = "diagnostics")]
            spawned_this_frame: 0,
            #[cfg(feature = "diagnostics")]
            despawned_this_frame: 0,
        };
        // Index 0 is always the empty archetype.
        world.find_or_create_archetype(Vec::new());
        world.components.register_cloneable::<Transform2d>();
        world.components.register_cloneable::<GlobalTransform>();
        world.components.register_cloneable::<Parent>();
        world.components.register_cloneable::<Children>();
        world
    }

    // ── Resources ────────────────────────────────────────────────────

    /// Insert a resource (singleton value). Replaces any existing resource of
    /// the same type.
    pub fn insert_resource<T: 'static + Send + Sync>(&mut self, value: T) {
        self.resources.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a shared reference to a resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource hasn't been inserted.
    pub fn resource<T: 'static + Send + Sync>(&self) -> &T {
        self.get_resource::<T>().unwrap_or_else(|| {
            panic!(
                "Resource `{}` not found. Did you forget to insert it?",
                std::any::type_name::<T>()
            )
        })
    }

    /// Get a mutable reference to a resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource hasn't been inserted.
    pub fn resource_mut<T: 'static + Send + Sync>(&mut self) -> &mut T {
        self.get_resource_mut::<T>().unwrap_or_else(|| {
            panic!(
                "Resource `{}` not found. Did you forget to insert it?",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn get_resource<T: 'static + Send + Sync>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|r| r.downcast_ref::<T>())
    }

    pub fn get_resource_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut T> {
        self.resources
            .get_mut(&TypeId::of::<T>())
            .and_then(|r| r.downcast_mut::<T>())
    }

    pub fn has_resource<T: 'static + Send + Sync>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }

    /// Remove a resource, taking ownership. Returns `None` if not present.
    pub fn resource_remove<T: 'static + Send + Sync>(&mut self) -> Option<T> {
        self.resources
            .remove(&TypeId::of::<T>())
            .and_then(|r| r.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Take a resource out, run `f` with both the world and the resource, and
    /// put it back. Lets a system query the world while holding the resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource hasn't been inserted.
    pub fn resource_scope<T: 'static + Send + Sync, U>(
        &mut self,
        f: impl FnOnce(&mut World, &mut T) -> U,
    ) -> U {
        let mut value = self.resource_remove::<T>().unwrap_or_else(|| {
            panic!(
                "Resource `{}` not found. Did you forget to insert it?",
                std::any::type_name::<T>()
            )
        });
        let out = f(self, &mut value);
        self.insert_resource(value);
        out
    }

    // ── Component Types ──────────────────────────────────────────────

    /// Register `T` ahead of first use. Optional: unregistered types are
    /// registered on first insertion.
    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    /// Register `T` with clone capability so entities carrying it can be
    /// [`duplicate`](World::duplicate)d.
    pub fn register_cloneable<T: Component + Clone>(&mut self) -> ComponentId {
        self.components.register_cloneable::<T>()
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // ── Entity Bookkeeping ───────────────────────────────────────────

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Number of archetypes ever created, including empty ones.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Current location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.allocator.is_alive(entity) {
            Some(self.locations[entity.index as usize])
        } else {
            None
        }
    }

    /// Counter bumped by every spawn, despawn, and migration.
    pub fn structure_epoch(&self) -> u64 {
        self.structure_epoch
    }

    /// Whether `entity` currently has a `T`. `false` for stale handles.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match (self.location(entity), self.components.id_of::<T>()) {
            (Some(loc), Some(id)) => self.archetypes[loc.archetype].has_component(id),
            _ => false,
        }
    }

    /// Every live entity carrying a `T`.
    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        let Some(id) = self.components.id_of::<T>() else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for arch in &self.archetypes {
            if arch.has_component(id) {
                result.extend_from_slice(&arch.entities);
            }
        }
        result
    }

    fn expect_location(&self, entity: Entity, op: &str) -> EntityLocation {
        self.location(entity)
            .unwrap_or_else(|| panic!("{op}: entity {entity:?} is not alive"))
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, EntityLocation::default());
        }
        self.locations[index] = location;
    }

    // ── Spawn / Despawn ──────────────────────────────────────────────

    /// Spawn an entity with no components. It lives in the empty archetype.
    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn(())
    }

    /// Spawn an entity with a bundle of components (tuple), placed straight
    /// into its final archetype.
    ///
    /// # Panics
    ///
    /// Panics if the bundle names the same component type twice.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let ids = B::component_ids(&mut self.components);
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            panic!(
                "spawn: bundle `{}` contains the same component type twice",
                std::any::type_name::<B>()
            );
        }
        let archetype = self.find_or_create_archetype(sorted);

        let entity = self.allocator.allocate();
        let arch = &mut self.archetypes[archetype];
        let row = arch.len();
        arch.entities.push(entity);
        bundle.write(&mut BundleWriter { archetype: arch }, &ids);
        self.set_location(entity, EntityLocation { archetype, row });

        self.structure_epoch += 1;
        #[cfg(feature = "diagnostics")]
        {
            self.spawned_this_frame += 1;
        }
        entity
    }

    /// Spawn an entity with a single component, no tuple needed.
    pub fn spawn_one<T: Component>(&mut self, component: T) -> Entity {
        self.spawn((component,))
    }

    /// Despawn an entity and free its slot for reuse.
    ///
    /// Children of the entity are orphaned (they lose their [`Parent`] and
    /// become roots), and the entity is removed from its own parent's
    /// [`Children`]. Use [`despawn_recursive`](World::despawn_recursive) to
    /// take the whole subtree down instead.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.allocator.is_alive(entity) {
            return false;
        }
        self.detach_relations(entity);

        let loc = self.locations[entity.index as usize];
        if let Some(swapped) = self.archetypes[loc.archetype].swap_remove(loc.row) {
            self.locations[swapped.index as usize].row = loc.row;
        }
        self.allocator.deallocate(entity);

        self.structure_epoch += 1;
        #[cfg(feature = "diagnostics")]
        {
            self.despawned_this_frame += 1;
        }
        true
    }

    /// Despawn every entity in the world. Archetypes and resources stay.
    pub fn despawn_all(&mut self) {
        let all: Vec<Entity> = self
            .archetypes
            .iter()
            .flat_map(|arch| arch.entities.iter().copied())
            .collect();
        for entity in all {
            self.despawn(entity);
        }
    }

    /// Spawn a copy of `entity` holding a clone of each of its components.
    ///
    /// The copy does not inherit [`Children`]; if the source has a parent,
    /// the copy becomes that parent's child too.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale or carries a component type that was not
    /// registered with [`register_cloneable`](World::register_cloneable).
    pub fn duplicate(&mut self, entity: Entity) -> Entity {
        let loc = self.expect_location(entity, "duplicate");

        let mut cloners = Vec::new();
        for &id in self.archetypes[loc.archetype].components() {
            let info = self.components.info(id);
            match info.clone_row_fn() {
                Some(clone) => cloners.push((id, clone)),
                None => panic!(
                    "duplicate: component `{}` on {:?} is not cloneable \
                     (register it with `register_cloneable`)",
                    info.name(),
                    entity
                ),
            }
        }

        let copy = self.allocator.allocate();
        let arch = &mut self.archetypes[loc.archetype];
        for (id, clone) in cloners {
            if let Some(column) = arch.columns.get_mut(&id) {
                clone(column.as_mut(), loc.row);
            }
        }
        arch.entities.push(copy);
        let row = arch.len() - 1;
        self.set_location(
            copy,
            EntityLocation {
                archetype: loc.archetype,
                row,
            },
        );
        self.structure_epoch += 1;
        #[cfg(feature = "diagnostics")]
        {
            self.spawned_this_frame += 1;
        }

        self.remove_component::<Children>(copy);
        if let Some(parent) = self.try_get::<Parent>(copy).map(|p| p.0) {
            if let Some(children) = self.try_get_mut::<Children>(parent) {
                children.0.push(copy);
            }
        }
        copy
    }

    // ── Per-Entity Component Access ──────────────────────────────────

    /// Shared reference to `entity`'s `T`.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale or has no `T`.
    pub fn get<T: Component>(&self, entity: Entity) -> &T {
        self.expect_location(entity, "get");
        self.try_get::<T>(entity).unwrap_or_else(|| {
            panic!(
                "get: entity {:?} has no component `{}`",
                entity,
                std::any::type_name::<T>()
            )
        })
    }

    /// Mutable reference to `entity`'s `T`.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale or has no `T`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> &mut T {
        self.expect_location(entity, "get_mut");
        self.try_get_mut::<T>(entity).unwrap_or_else(|| {
            panic!(
                "get_mut: entity {:?} has no component `{}`",
                entity,
                std::any::type_name::<T>()
            )
        })
    }

    /// `None` if the entity is stale or has no `T`.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let loc = self.location(entity)?;
        let id = self.components.id_of::<T>()?;
        self.component_at::<T>(loc, id)
    }

    pub fn try_get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let loc = self.location(entity)?;
        let id = self.components.id_of::<T>()?;
        self.component_at_mut::<T>(loc, id)
    }

    /// Read a component through a cached location, skipping the liveness
    /// check. The caller guarantees `loc` is current.
    pub(crate) fn component_at<T: Component>(
        &self,
        loc: EntityLocation,
        id: ComponentId,
    ) -> Option<&T> {
        self.archetypes[loc.archetype]
            .column::<T>(id)
            .map(|col| &col.data[loc.row])
    }

    pub(crate) fn component_at_mut<T: Component>(
        &mut self,
        loc: EntityLocation,
        id: ComponentId,
    ) -> Option<&mut T> {
        self.archetypes[loc.archetype]
            .column_mut::<T>(id)
            .map(|col| &mut col.data[loc.row])
    }

    // ── Component Add/Remove ─────────────────────────────────────────

    /// Add a component to an existing entity, migrating it to the archetype
    /// of its type-set plus `T`. Returns a reference to the new value, which
    /// lives until the next structural change.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale or already has a `T`. Use
    /// [`insert`](World::insert) to add-or-replace.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> &mut T {
        let loc = self.expect_location(entity, "add_component");
        let id = self.components.register::<T>();
        if self.archetypes[loc.archetype].has_component(id) {
            panic!(
                "add_component: entity {:?} already has component `{}`",
                entity,
                std::any::type_name::<T>()
            );
        }

        let dst = self.add_target(loc.archetype, id);
        let row = self.migrate(entity, loc, dst, None);
        let arch = &mut self.archetypes[dst];
        arch.push_value(id, component);
        match arch.column_mut::<T>(id) {
            Some(col) => &mut col.data[row],
            None => unreachable!("column pushed above"),
        }
    }

    /// Add `component`, or overwrite the existing `T` in place (no migration).
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) {
        if let Some(slot) = self.try_get_mut::<T>(entity) {
            *slot = component;
            return;
        }
        self.add_component(entity, component);
    }

    /// Remove `entity`'s `T` and hand it back. `None` if it had none.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let loc = self.expect_location(entity, "remove_component");
        let id = self.components.id_of::<T>()?;
        if !self.archetypes[loc.archetype].has_component(id) {
            return None;
        }

        let dst = self.remove_target(loc.archetype, id);
        // Same swap as the other columns get in `migrate`.
        let value = self.archetypes[loc.archetype]
            .column_mut::<T>(id)?
            .data
            .swap_remove(loc.row);
        self.migrate(entity, loc, dst, Some(id));
        Some(value)
    }

    /// Move `entity`'s row into archetype `dst`. `skip` names a column whose
    /// value the caller already took out. Returns the new row.
    fn migrate(
        &mut self,
        entity: Entity,
        loc: EntityLocation,
        dst: usize,
        skip: Option<ComponentId>,
    ) -> usize {
        let (src_arch, dst_arch) = pair_mut(&mut self.archetypes, loc.archetype, dst);
        let row = dst_arch.len();
        if let Some(swapped) = src_arch.move_row_to(loc.row, dst_arch, skip) {
            self.locations[swapped.index as usize].row = loc.row;
        }
        log::trace!(
            "migrated {:?} from archetype {} to {}",
            entity,
            loc.archetype,
            dst
        );
        self.locations[entity.index as usize] = EntityLocation { archetype: dst, row };
        self.structure_epoch += 1;
        row
    }

    fn add_target(&mut self, src: usize, id: ComponentId) -> usize {
        if let Some(dst) = self.archetypes[src].add_edge(id) {
            return dst;
        }
        let mut set = self.archetypes[src].components().to_vec();
        set.push(id);
        set.sort_unstable();
        let dst = self.find_or_create_archetype(set);
        self.archetypes[src].set_add_edge(id, dst);
        self.archetypes[dst].set_remove_edge(id, src);
        dst
    }

    fn remove_target(&mut self, src: usize, id: ComponentId) -> usize {
        if let Some(dst) = self.archetypes[src].remove_edge(id) {
            return dst;
        }
        let set: Vec<ComponentId> = self.archetypes[src]
            .components()
            .iter()
            .copied()
            .filter(|&c| c != id)
            .collect();
        let dst = self.find_or_create_archetype(set);
        self.archetypes[src].set_remove_edge(id, dst);
        self.archetypes[dst].set_add_edge(id, src);
        dst
    }

    /// `components` must be sorted and deduplicated.
    fn find_or_create_archetype(&mut self, components: Vec<ComponentId>) -> usize {
        if let Some(&index) = self.archetype_lookup.get(&components) {
            return index;
        }
        let columns = components
            .iter()
            .map(|&id| (id, self.components.info(id).new_column()))
            .collect();
        let index = self.archetypes.len();
        let arch = Archetype::new(components.clone(), columns);
        log::debug!(
            "created archetype #{} {:?} [{}]",
            index,
            arch.id(),
            self.component_names(&components).join(", ")
        );
        self.archetypes.push(arch);
        self.archetype_lookup.insert(components, index);
        index
    }

    fn component_names(&self, ids: &[ComponentId]) -> Vec<String> {
        ids.iter()
            .map(|&id| self.components.info(id).short_name().to_string())
            .collect()
    }

    // ── Query / Commands ─────────────────────────────────────────────

    /// Start a query over every entity carrying all of `Q`'s component types.
    ///
    /// ```ignore
    /// world.query::<(&mut Position, &Velocity)>()
    ///     .without::<Frozen>()
    ///     .each(|_, (pos, vel)| pos.0 += vel.0);
    /// ```
    pub fn query<Q: QueryParam>(&mut self) -> Query<'_, Q> {
        Query::new(
            &mut self.archetypes,
            &self.components,
            &mut self.commands,
            self.par_chunk_size,
        )
    }

    /// Default rows per task for [`Query::par_each`].
    pub fn par_chunk_size(&self) -> usize {
        self.par_chunk_size
    }

    pub fn set_par_chunk_size(&mut self, rows: usize) {
        self.par_chunk_size = rows.max(1);
    }

    /// The world's own command queue, applied by
    /// [`flush_commands`](World::flush_commands).
    pub fn commands(&mut self) -> &mut Commands {
        &mut self.commands
    }

    /// Apply queued commands until the queue stays empty. Commands may queue
    /// further commands; those run in the same flush.
    pub fn flush_commands(&mut self) {
        loop {
            let mut pending = std::mem::take(&mut self.commands);
            if pending.is_empty() {
                break;
            }
            pending.apply(self);
        }
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Non-empty archetypes, largest first.
    #[cfg(feature = "diagnostics")]
    pub(crate) fn diagnostics_archetypes(&self) -> Vec<crate::diag::ArchetypeSnapshot> {
        let mut out: Vec<_> = self
            .archetypes
            .iter()
            .filter(|arch| !arch.is_empty())
            .map(|arch| crate::diag::ArchetypeSnapshot {
                id: arch.id(),
                entity_count: arch.len(),
                component_names: self.component_names(arch.components()),
            })
            .collect();
        out.sort_by(|a, b| b.entity_count.cmp(&a.entity_count));
        out
    }

    /// Entity pool statistics. Resets the per-frame spawn counters.
    #[cfg(feature = "diagnostics")]
    pub(crate) fn diagnostics_entity_stats(&mut self) -> crate::diag::EntityPoolStats {
        let stats = crate::diag::EntityPoolStats {
            total_slots: self.allocator.total_slots(),
            free_count: self.allocator.free_count(),
            alive_count: self.allocator.alive_count(),
            spawned_this_frame: self.spawned_this_frame,
            despawned_this_frame: self.despawned_this_frame,
        };
        self.spawned_this_frame = 0;
        self.despawned_this_frame = 0;
        stats
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ── Bundles ──────────────────────────────────────────────────────────────

/// Write access to the archetype a bundle is being spawned into.
pub struct BundleWriter<'a> {
    archetype: &'a mut Archetype,
}

impl BundleWriter<'_> {
    fn push<T: Component>(&mut self, id: ComponentId, value: T) {
        self.archetype.push_value(id, value);
    }
}

/// A set of components spawned together.
///
/// Implemented for `()` and tuples of up to 8 components.
pub trait Bundle: 'static {
    /// Register the bundle's types, returning their ids in tuple order.
    fn component_ids(registry: &mut ComponentRegistry) -> Vec<ComponentId>;

    /// Push each component into its column; `ids` is what
    /// [`component_ids`](Bundle::component_ids) returned.
    fn write(self, writer: &mut BundleWriter<'_>, ids: &[ComponentId]);
}

impl Bundle for () {
    fn component_ids(_: &mut ComponentRegistry) -> Vec<ComponentId> {
        Vec::new()
    }

    fn write(self, _: &mut BundleWriter<'_>, _: &[ComponentId]) {}
}

macro_rules! impl_bundle {
    ($($T:ident $i:tt),+) => {
        impl<$($T: Component),+> Bundle for ($($T,)+) {
            fn component_ids(registry: &mut ComponentRegistry) -> Vec<ComponentId> {
                vec![$(registry.register::<$T>()),+]
            }

            fn write(self, writer: &mut BundleWriter<'_>, ids: &[ComponentId]) {
                $(writer.push::<$T>(ids[$i], self.$i);)+
            }
        }
    };
}

impl_bundle!(A 0);
impl_bundle!(A 0, B 1);
impl_bundle!(A 0, B 1, C 2);
impl_bundle!(A 0, B 1, C 2, D 3);
impl_bundle!(A 0, B 1, C 2, D 3, E 4);
impl_bundle!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_bundle!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_bundle!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    #[derive(Clone, Debug, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    #[derive(Debug, PartialEq)]
    struct Health(u32);
    struct Renderable;
    struct Shield;

    fn pos(x: f32, y: f32) -> Position {
        Position { x, y }
    }

    fn vel(dx: f32, dy: f32) -> Velocity {
        Velocity { dx, dy }
    }

    #[test]
    fn spawn_and_query() {
        let mut world = World::new();
        world.spawn((pos(1.0, 2.0), vel(0.5, -0.5)));
        world.spawn((pos(3.0, 4.0), vel(1.0, 1.0)));
        world.spawn((pos(5.0, 6.0),));

        let mut results = Vec::new();
        world
            .query::<(&Position, &Velocity)>()
            .each(|_, (p, v)| results.push((p.x, v.dx)));
        results.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(results, vec![(1.0, 0.5), (3.0, 1.0)]);
    }

    #[test]
    fn spawn_empty_lives_in_empty_archetype() {
        let mut world = World::new();
        let e = world.spawn_empty();
        assert!(world.is_alive(e));
        assert_eq!(world.location(e).map(|l| l.archetype()), Some(0));
        assert!(!world.has::<Position>(e));
    }

    #[test]
    fn despawn_swap_remove_preserves_data() {
        let mut world = World::new();
        let e0 = world.spawn((Health(10),));
        let e1 = world.spawn((Health(20),));
        let e2 = world.spawn((Health(30),));

        assert!(world.despawn(e0));
        assert!(!world.despawn(e0));

        assert_eq!(world.get::<Health>(e1), &Health(20));
        assert_eq!(world.get::<Health>(e2), &Health(30));
        assert_eq!(world.location(e2).map(|l| l.row()), Some(0));
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn resources() {
        let mut world = World::new();
        world.insert_resource(42u32);
        world.insert_resource(String::from("hello"));

        assert_eq!(*world.resource::<u32>(), 42);
        assert_eq!(world.resource::<String>(), "hello");

        *world.resource_mut::<u32>() = 99;
        assert_eq!(*world.resource::<u32>(), 99);
    }

    #[test]
    fn resource_remove_and_scope() {
        let mut world = World::new();
        world.insert_resource(String::from("hello"));

        let taken = world.resource_remove::<String>();
        assert_eq!(taken.as_deref(), Some("hello"));
        assert!(!world.has_resource::<String>());
        assert_eq!(world.resource_remove::<u64>(), None);

        world.insert_resource(5u32);
        let e = world.spawn((Health(1),));
        world.resource_scope::<u32, _>(|world, n| {
            world.get_mut::<Health>(e).0 += *n;
            *n += 1;
        });
        assert_eq!(world.get::<Health>(e), &Health(6));
        assert_eq!(*world.resource::<u32>(), 6);
    }

    #[test]
    fn try_get_reports_absence() {
        let mut world = World::new();
        let e = world.spawn((pos(42.0, 99.0),));

        assert_eq!(world.try_get::<Position>(e), Some(&pos(42.0, 99.0)));
        assert!(world.try_get::<Velocity>(e).is_none());

        world.try_get_mut::<Position>(e).unwrap().x = 10.0;
        assert_eq!(world.get::<Position>(e).x, 10.0);
    }

    #[test]
    #[should_panic(expected = "has no component")]
    fn get_missing_panics() {
        let mut world = World::new();
        let e = world.spawn((pos(0.0, 0.0),));
        world.get::<Velocity>(e);
    }

    #[test]
    #[should_panic(expected = "already has component")]
    fn add_component_twice_panics() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.add_component(e, Health(2));
    }

    #[test]
    fn add_component_returns_new_value() {
        let mut world = World::new();
        let e = world.spawn((pos(1.0, 2.0),));
        let v = world.add_component(e, vel(0.0, 0.0));
        v.dx = 7.0;
        assert_eq!(world.get::<Velocity>(e), &vel(7.0, 0.0));
        assert_eq!(world.get::<Position>(e), &pos(1.0, 2.0));
    }

    #[test]
    fn insert_replaces_without_migration() {
        let mut world = World::new();
        let e = world.spawn((Health(50),));
        let before = world.structure_epoch();
        world.insert(e, Health(100));
        assert_eq!(world.get::<Health>(e), &Health(100));
        assert_eq!(world.structure_epoch(), before);
    }

    #[test]
    fn remove_component_returns_value() {
        let mut world = World::new();
        let e = world.spawn((pos(1.0, 2.0), Shield));

        assert!(world.remove_component::<Shield>(e).is_some());
        assert!(!world.has::<Shield>(e));
        assert!(world.remove_component::<Shield>(e).is_none());
        assert!(world.remove_component::<Velocity>(e).is_none());
        assert_eq!(world.get::<Position>(e), &pos(1.0, 2.0));
    }

    #[test]
    fn migration_round_trip_preserves_data() {
        let mut world = World::new();
        let e = world.spawn((pos(3.0, 4.0), Health(9)));
        let home = world.location(e).map(|l| l.archetype());

        world.add_component(e, vel(1.0, -1.0));
        let removed = world.remove_component::<Velocity>(e);

        assert_eq!(removed, Some(vel(1.0, -1.0)));
        assert_eq!(world.location(e).map(|l| l.archetype()), home);
        assert_eq!(world.get::<Position>(e), &pos(3.0, 4.0));
        assert_eq!(world.get::<Health>(e), &Health(9));
    }

    #[test]
    fn migration_leaves_other_entities_intact() {
        let mut world = World::new();
        let entities: Vec<Entity> = (0..5)
            .map(|i| world.spawn((pos(i as f32, 0.0), Health(i))))
            .collect();

        // Moving the first row out swaps the last one into its place.
        world.add_component(entities[0], Shield);
        world.remove_component::<Health>(entities[2]);

        for (i, &e) in entities.iter().enumerate() {
            assert_eq!(world.get::<Position>(e), &pos(i as f32, 0.0));
        }
        assert_eq!(world.get::<Health>(entities[4]), &Health(4));
        assert!(world.archetypes.iter().all(|a| a.is_consistent()));
    }

    #[test]
    fn transition_edges_reuse_archetypes() {
        let mut world = World::new();
        let a = world.spawn((Health(1),));
        let b = world.spawn((Health(2),));
        world.add_component(a, Shield);
        let count = world.archetype_count();
        world.add_component(b, Shield);
        world.remove_component::<Shield>(a);
        assert_eq!(world.archetype_count(), count);
    }

    #[test]
    fn stale_handles_are_detected() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.despawn(e);
        let reused = world.spawn((Health(2),));

        assert_eq!(reused.index(), e.index());
        assert!(!world.is_alive(e));
        assert!(world.try_get::<Health>(e).is_none());
        assert!(!world.has::<Health>(e));
        assert_eq!(world.get::<Health>(reused), &Health(2));
    }

    #[test]
    #[should_panic(expected = "is not alive")]
    fn stale_get_panics() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.despawn(e);
        world.get::<Health>(e);
    }

    #[test]
    fn superset_and_exclusion_query() {
        let mut world = World::new();
        let a = world.spawn((pos(0.0, 0.0), vel(1.0, 0.0)));
        let b = world.spawn((pos(3.0, 4.0), vel(2.0, 0.0)));
        let _c = world.spawn((pos(0.0, 0.0),));

        // Migrates b into the (Position, Velocity, Renderable) archetype.
        world.add_component(b, Renderable);
        assert_eq!(world.get::<Position>(b), &pos(3.0, 4.0));
        assert_eq!(world.get::<Velocity>(b), &vel(2.0, 0.0));
        assert_eq!(world.get::<Position>(a), &pos(0.0, 0.0));

        let mut moving = world.query::<(&Position, &Velocity)>().entities();
        moving.sort();
        assert_eq!(moving, vec![a, b]);

        let hidden = world
            .query::<(&Position, &Velocity)>()
            .without::<Renderable>()
            .entities();
        assert_eq!(hidden, vec![a]);

        let shown = world
            .query::<&Position>()
            .with::<Renderable>()
            .entities();
        assert_eq!(shown, vec![b]);
    }

    #[test]
    fn entities_with_spans_archetypes() {
        let mut world = World::new();
        assert!(world.entities_with::<Health>().is_empty());

        let a = world.spawn((Health(1),));
        let b = world.spawn((Health(2), pos(0.0, 0.0)));
        let _c = world.spawn((pos(1.0, 1.0),));
        let d = world.spawn((vel(0.0, 0.0),));
        world.add_component(d, Health(3));
        world.despawn(a);

        let mut found = world.entities_with::<Health>();
        found.sort();
        assert_eq!(found, vec![b, d]);
    }

    #[test]
    fn duplicate_clones_components() {
        let mut world = World::new();
        world.register_cloneable::<Position>();
        world.register_cloneable::<Velocity>();
        let e = world.spawn((pos(1.0, 1.0), vel(2.0, 2.0)));

        let copy = world.duplicate(e);
        assert_ne!(copy, e);
        assert_eq!(world.get::<Position>(copy), &pos(1.0, 1.0));
        world.get_mut::<Position>(copy).x = 5.0;
        assert_eq!(world.get::<Position>(e).x, 1.0);
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    #[should_panic(expected = "not cloneable")]
    fn duplicate_requires_cloneable() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.duplicate(e);
    }

    #[test]
    #[should_panic(expected = "same component type twice")]
    fn bundle_with_duplicate_types_panics() {
        let mut world = World::new();
        world.spawn((Health(1), Health(2)));
    }

    #[test]
    fn epoch_tracks_structural_changes() {
        let mut world = World::new();
        let e0 = world.structure_epoch();
        let e = world.spawn((Health(1),));
        let e1 = world.structure_epoch();
        world.add_component(e, Shield);
        let e2 = world.structure_epoch();
        world.despawn(e);
        assert!(e0 < e1 && e1 < e2 && e2 < world.structure_epoch());
    }

    #[test]
    fn despawn_all_clears_entities() {
        let mut world = World::new();
        for i in 0..4 {
            world.spawn((Health(i),));
        }
        world.spawn_empty();
        world.despawn_all();
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.query::<&Health>().count(), 0);
    }

    #[test]
    fn drop_runs_on_despawn_and_remove() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let a = world.spawn((Tracked(drops.clone()), Health(1)));
        let b = world.spawn((Tracked(drops.clone()),));

        world.despawn(a);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(world.remove_component::<Tracked>(b));
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn flush_applies_commands_recorded_during_iteration() {
        let mut world = World::new();
        for i in 0..3 {
            world.spawn((Health(i),));
        }
        world
            .query::<&Health>()
            .each_with_commands(|commands, entity, hp| {
                if hp.0 == 1 {
                    commands.despawn(entity);
                } else {
                    commands.insert(entity, Shield);
                }
            });
        assert_eq!(world.commands().len(), 3);

        world.flush_commands();
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.query::<&Health>().with::<Shield>().count(), 2);
    }
}
