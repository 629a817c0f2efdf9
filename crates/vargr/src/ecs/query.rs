//! # Query — Iterating Over Entities by Component Type
//!
//! A query names the component types it needs and visits every archetype
//! whose set contains all of them (and none of the excluded ones).
//!
//! ```text
//! world.query::<(&Position, &mut Velocity)>()
//!     .without::<Frozen>()
//!     .each(|entity, (pos, vel)| { ... });
//!
//! 1. Resolve component ids: [Position, Velocity], excluded [Frozen]
//! 2. For each archetype: superset of required? disjoint from excluded?
//! 3. Take the needed columns out of the archetype, iterate rows, put them back
//! ```
//!
//! ## Closure-Based Design
//!
//! Rust's `Iterator` cannot yield items that borrow from the iterator itself,
//! so iteration is closure-based. Columns are temporarily removed from the
//! archetype's column map, which gives owned access the borrow checker can
//! see through: two different columns can be borrowed mutably at once without
//! `unsafe`. Each extracted column is downcast once per archetype to its
//! `Vec<T>`, and rows are then plain slice indexing.
//!
//! ## Spans and Parallelism
//!
//! [`Query::all`] hands out whole column slices per archetype for
//! vectorizable work. [`Query::par_each`] splits those slices into row ranges
//! and runs them on rayon's pool; the closure gets no world access, so it can
//! neither mutate structure nor reach columns outside the query.

use std::marker::PhantomData;

use super::archetype::{Archetype, ColumnMap};
use super::commands::Commands;
use super::component::{Component, ComponentId, ComponentRegistry, TypedColumn, downcast_column_box};
use super::entity::Entity;

/// Default number of rows per parallel task.
pub const DEFAULT_PAR_CHUNK: usize = 1024;

/// Something that can be fetched per row from an archetype.
///
/// Implemented for `&T` (shared read) and `&mut T` (exclusive write), and for
/// tuples of up to 8 params.
pub trait QueryParam {
    /// The item yielded per entity.
    type Item<'w>;

    /// Owned column data extracted from the archetype.
    type Column;

    /// Borrowed view over a whole extracted column (or tuple of them).
    type Slice<'w>: Send;

    /// Component ids this param needs, or `None` if one of its types was
    /// never registered (so no archetype can match).
    fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentId>>;

    /// Take the needed column(s) out of the archetype's column map.
    fn extract(columns: &mut ColumnMap, registry: &ComponentRegistry) -> Self::Column;

    /// Put the column(s) back.
    fn restore(col: Self::Column, columns: &mut ColumnMap);

    fn slice(col: &mut Self::Column) -> Self::Slice<'_>;

    fn split_slice<'w>(slice: Self::Slice<'w>, mid: usize) -> (Self::Slice<'w>, Self::Slice<'w>);

    fn slice_item<'s, 'w>(slice: &'s mut Self::Slice<'w>, index: usize) -> Self::Item<'s>;
}

fn take_column<T: Component>(
    columns: &mut ColumnMap,
    registry: &ComponentRegistry,
) -> (ComponentId, Box<TypedColumn<T>>) {
    let id = registry.id_of::<T>().unwrap_or_else(|| {
        panic!(
            "Query extract: `{}` is not registered",
            std::any::type_name::<T>()
        )
    });
    let col = columns.remove(&id).unwrap_or_else(|| {
        panic!(
            "Query extract: column for `{}` not found in archetype (requested twice?)",
            std::any::type_name::<T>()
        )
    });
    (id, downcast_column_box::<T>(col))
}

impl<T: Component> QueryParam for &T {
    type Item<'w> = &'w T;
    type Column = (ComponentId, Box<TypedColumn<T>>);
    type Slice<'w> = &'w [T];

    fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentId>> {
        registry.id_of::<T>().map(|id| vec![id])
    }

    fn extract(columns: &mut ColumnMap, registry: &ComponentRegistry) -> Self::Column {
        take_column::<T>(columns, registry)
    }

    fn restore(col: Self::Column, columns: &mut ColumnMap) {
        columns.insert(col.0, col.1);
    }

    fn slice(col: &mut Self::Column) -> Self::Slice<'_> {
        col.1.as_slice()
    }

    fn split_slice<'w>(slice: Self::Slice<'w>, mid: usize) -> (Self::Slice<'w>, Self::Slice<'w>) {
        slice.split_at(mid)
    }

    fn slice_item<'s, 'w>(slice: &'s mut Self::Slice<'w>, index: usize) -> Self::Item<'s> {
        &slice[index]
    }
}

impl<T: Component> QueryParam for &mut T {
    type Item<'w> = &'w mut T;
    type Column = (ComponentId, Box<TypedColumn<T>>);
    type Slice<'w> = &'w mut [T];

    fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentId>> {
        registry.id_of::<T>().map(|id| vec![id])
    }

    fn extract(columns: &mut ColumnMap, registry: &ComponentRegistry) -> Self::Column {
        take_column::<T>(columns, registry)
    }

    fn restore(col: Self::Column, columns: &mut ColumnMap) {
        columns.insert(col.0, col.1);
    }

    fn slice(col: &mut Self::Column) -> Self::Slice<'_> {
        col.1.as_mut_slice()
    }

    fn split_slice<'w>(slice: Self::Slice<'w>, mid: usize) -> (Self::Slice<'w>, Self::Slice<'w>) {
        slice.split_at_mut(mid)
    }

    fn slice_item<'s, 'w>(slice: &'s mut Self::Slice<'w>, index: usize) -> Self::Item<'s> {
        &mut slice[index]
    }
}

/// Implement `QueryParam` for tuples of params, so `(&A, &mut B)` yields
/// `(&A, &mut B)` per matching entity.
macro_rules! impl_query_param_tuple {
    ($($P:ident),+) => {
        impl<$($P: QueryParam),+> QueryParam for ($($P,)+) {
            type Item<'w> = ($($P::Item<'w>,)+);
            type Column = ($($P::Column,)+);
            type Slice<'w> = ($($P::Slice<'w>,)+);

            fn component_ids(registry: &ComponentRegistry) -> Option<Vec<ComponentId>> {
                let mut ids = Vec::new();
                $(ids.extend($P::component_ids(registry)?);)+
                Some(ids)
            }

            fn extract(columns: &mut ColumnMap, registry: &ComponentRegistry) -> Self::Column {
                ($($P::extract(columns, registry),)+)
            }

            #[allow(non_snake_case)]
            fn restore(col: Self::Column, columns: &mut ColumnMap) {
                let ($($P,)+) = col;
                $($P::restore($P, columns);)+
            }

            #[allow(non_snake_case)]
            fn slice(col: &mut Self::Column) -> Self::Slice<'_> {
                let ($($P,)+) = col;
                ($($P::slice($P),)+)
            }

            #[allow(non_snake_case)]
            fn split_slice<'w>(
                slice: Self::Slice<'w>,
                mid: usize,
            ) -> (Self::Slice<'w>, Self::Slice<'w>) {
                let ($($P,)+) = slice;
                let ($($P,)+) = ($($P::split_slice($P, mid),)+);
                (($($P.0,)+), ($($P.1,)+))
            }

            #[allow(non_snake_case)]
            fn slice_item<'s, 'w>(slice: &'s mut Self::Slice<'w>, index: usize) -> Self::Item<'s> {
                let ($($P,)+) = slice;
                ($($P::slice_item($P, index),)+)
            }
        }
    };
}

impl_query_param_tuple!(A);
impl_query_param_tuple!(A, B);
impl_query_param_tuple!(A, B, C);
impl_query_param_tuple!(A, B, C, D);
impl_query_param_tuple!(A, B, C, D, E);
impl_query_param_tuple!(A, B, C, D, E, F);
impl_query_param_tuple!(A, B, C, D, E, F, G);
impl_query_param_tuple!(A, B, C, D, E, F, G, H);

/// A query under construction. Built by [`World::query`](super::world::World::query),
/// narrowed with [`with`](Query::with) / [`without`](Query::without), and
/// consumed by one of the iteration methods.
pub struct Query<'w, Q: QueryParam> {
    archetypes: &'w mut [Archetype],
    registry: &'w ComponentRegistry,
    commands: &'w mut Commands,
    required: Option<Vec<ComponentId>>,
    excluded: Vec<ComponentId>,
    chunk_size: usize,
    marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QueryParam> Query<'w, Q> {
    pub(crate) fn new(
        archetypes: &'w mut [Archetype],
        registry: &'w ComponentRegistry,
        commands: &'w mut Commands,
        chunk_size: usize,
    ) -> Self {
        Self {
            archetypes,
            registry,
            required: Q::component_ids(registry),
            commands,
            excluded: Vec::new(),
            chunk_size,
            marker: PhantomData,
        }
    }

    /// Only match entities that also have `F`. The filter component is not
    /// yielded.
    pub fn with<F: Component>(mut self) -> Self {
        match (self.registry.id_of::<F>(), self.required.as_mut()) {
            (Some(id), Some(required)) => required.push(id),
            // Nothing has `F`, so nothing matches.
            (None, _) => self.required = None,
            (_, None) => {}
        }
        self
    }

    /// Skip entities that have `F`.
    pub fn without<F: Component>(mut self) -> Self {
        // An unregistered type is on no archetype; nothing to exclude.
        if let Some(id) = self.registry.id_of::<F>() {
            self.excluded.push(id);
        }
        self
    }

    /// Rows per task for [`par_each`](Query::par_each).
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    fn matching(&self) -> Vec<usize> {
        let Some(required) = self.required.as_deref() else {
            return Vec::new();
        };
        self.archetypes
            .iter()
            .enumerate()
            .filter(|(_, arch)| !arch.is_empty() && arch.matches(required, &self.excluded))
            .map(|(index, _)| index)
            .collect()
    }

    /// Number of matching entities.
    pub fn count(self) -> usize {
        self.matching()
            .into_iter()
            .map(|i| self.archetypes[i].len())
            .sum()
    }

    /// All matching entities, in archetype then row order.
    pub fn entities(self) -> Vec<Entity> {
        let mut out = Vec::new();
        for i in self.matching() {
            out.extend_from_slice(&self.archetypes[i].entities);
        }
        out
    }

    /// Call `f` once per matching entity.
    pub fn each(self, mut f: impl FnMut(Entity, Q::Item<'_>)) {
        self.each_with_commands(|_, entity, item| f(entity, item));
    }

    /// Like [`each`](Query::each), also handing out the world's command queue
    /// for deferred structural changes.
    pub fn each_with_commands(self, mut f: impl FnMut(&mut Commands, Entity, Q::Item<'_>)) {
        let registry = self.registry;
        for index in self.matching() {
            let arch = &mut self.archetypes[index];
            let mut cols = Q::extract(&mut arch.columns, registry);
            {
                let mut slice = Q::slice(&mut cols);
                for (row, &entity) in arch.entities.iter().enumerate() {
                    f(&mut *self.commands, entity, Q::slice_item(&mut slice, row));
                }
            }
            Q::restore(cols, &mut arch.columns);
        }
    }

    /// Call `f` once per matching archetype with its entities and the
    /// requested columns as slices.
    pub fn all(self, mut f: impl FnMut(&[Entity], Q::Slice<'_>)) {
        let registry = self.registry;
        for index in self.matching() {
            let arch = &mut self.archetypes[index];
            let mut cols = Q::extract(&mut arch.columns, registry);
            f(&arch.entities, Q::slice(&mut cols));
            Q::restore(cols, &mut arch.columns);
        }
    }

    /// Call `f` on exactly one matching entity. Does nothing if none match.
    ///
    /// # Panics
    ///
    /// Panics if more than one entity matches.
    pub fn single(self, f: impl FnOnce(Entity, Q::Item<'_>)) {
        let matching = self.matching();
        let total: usize = matching.iter().map(|&i| self.archetypes[i].len()).sum();
        if total > 1 {
            panic!(
                "Query::single: {} entities match `{}`",
                total,
                std::any::type_name::<Q>()
            );
        }
        let Some(&index) = matching.first() else {
            return;
        };
        let arch = &mut self.archetypes[index];
        let mut cols = Q::extract(&mut arch.columns, self.registry);
        {
            let mut slice = Q::slice(&mut cols);
            f(arch.entities[0], Q::slice_item(&mut slice, 0));
        }
        Q::restore(cols, &mut arch.columns);
    }

    /// Call `f` once per matching entity, spreading row ranges across the
    /// rayon thread pool. Returns once every row has been visited.
    ///
    /// Without the `parallel` feature this runs sequentially.
    pub fn par_each<F>(self, f: F)
    where
        F: Fn(Entity, Q::Item<'_>) + Send + Sync,
    {
        let registry = self.registry;
        let chunk = self.chunk_size;
        for index in self.matching() {
            let arch = &mut self.archetypes[index];
            let mut cols = Q::extract(&mut arch.columns, registry);
            par_rows::<Q, F>(&arch.entities, Q::slice(&mut cols), chunk, &f);
            Q::restore(cols, &mut arch.columns);
        }
    }
}

#[cfg(feature = "parallel")]
fn par_rows<Q, F>(entities: &[Entity], mut slice: Q::Slice<'_>, chunk: usize, f: &F)
where
    Q: QueryParam,
    F: Fn(Entity, Q::Item<'_>) + Send + Sync,
{
    if entities.len() <= chunk {
        for (row, &entity) in entities.iter().enumerate() {
            f(entity, Q::slice_item(&mut slice, row));
        }
        return;
    }
    let mid = entities.len() / 2;
    let (left_entities, right_entities) = entities.split_at(mid);
    let (left, right) = Q::split_slice(slice, mid);
    rayon::join(
        || par_rows::<Q, F>(left_entities, left, chunk, f),
        || par_rows::<Q, F>(right_entities, right, chunk, f),
    );
}

#[cfg(not(feature = "parallel"))]
fn par_rows<Q, F>(entities: &[Entity], mut slice: Q::Slice<'_>, _chunk: usize, f: &F)
where
    Q: QueryParam,
    F: Fn(Entity, Q::Item<'_>) + Send + Sync,
{
    for (row, &entity) in entities.iter().enumerate() {
        f(entity, Q::slice_item(&mut slice, row));
    }
}

#[cfg(test)]
mod tests {
    use crate::ecs::world::World;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos(f32);
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vel(f32);
    struct Frozen;
    struct NeverSpawned;

    fn populated() -> World {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn((Pos(i as f32), Vel(1.0)));
        }
        for i in 0..5 {
            world.spawn((Pos(i as f32), Vel(1.0), Frozen));
        }
        world.spawn((Pos(100.0),));
        world
    }

    #[test]
    fn each_mutates_in_place() {
        let mut world = populated();
        world
            .query::<(&mut Pos, &Vel)>()
            .without::<Frozen>()
            .each(|_, (p, v)| p.0 += v.0);

        let mut sum = 0.0;
        world.query::<&Pos>().each(|_, p| sum += p.0);
        // 0..10 moved by one each, the frozen 0..5 and the lone 100 untouched.
        assert_eq!(sum, 55.0 + 10.0 + 100.0);
    }

    #[test]
    fn with_filters_without_yielding() {
        let mut world = populated();
        assert_eq!(world.query::<&Pos>().with::<Frozen>().count(), 5);
        assert_eq!(world.query::<&Pos>().with::<NeverSpawned>().count(), 0);
        assert_eq!(world.query::<&Pos>().without::<NeverSpawned>().count(), 16);
        assert_eq!(world.query::<&NeverSpawned>().count(), 0);
    }

    #[test]
    fn all_yields_one_span_per_archetype() {
        let mut world = populated();
        let mut spans = Vec::new();
        world.query::<(&Pos, &mut Vel)>().all(|entities, (pos, vel)| {
            assert_eq!(entities.len(), pos.len());
            assert_eq!(pos.len(), vel.len());
            for v in vel.iter_mut() {
                v.0 *= 2.0;
            }
            spans.push(entities.len());
        });
        spans.sort();
        assert_eq!(spans, vec![5, 10]);

        let mut total = 0.0;
        world.query::<&Vel>().each(|_, v| total += v.0);
        assert_eq!(total, 30.0);
    }

    #[test]
    fn par_each_visits_every_row_once() {
        let mut world = World::new();
        for i in 0..5000 {
            world.spawn((Pos(i as f32), Vel(0.0)));
        }
        world
            .query::<(&Pos, &mut Vel)>()
            .chunk_size(64)
            .par_each(|_, (p, v)| v.0 = p.0 * 2.0);

        let mut mismatches = 0;
        world.query::<(&Pos, &Vel)>().each(|_, (p, v)| {
            if v.0 != p.0 * 2.0 {
                mismatches += 1;
            }
        });
        assert_eq!(mismatches, 0);
    }

    #[test]
    fn single_finds_singleton() {
        let mut world = populated();
        let mut found = None;
        world.query::<&Pos>().without::<Vel>().single(|e, p| found = Some((e, *p)));
        assert_eq!(found.map(|(_, p)| p), Some(Pos(100.0)));

        let mut called = false;
        world.query::<&Pos>().with::<NeverSpawned>().single(|_, _| called = true);
        assert!(!called);
    }

    #[test]
    #[should_panic(expected = "entities match")]
    fn single_panics_on_multiple() {
        let mut world = populated();
        world.query::<&Pos>().with::<Frozen>().single(|_, _| {});
    }

    #[test]
    fn columns_are_restored_after_iteration() {
        let mut world = populated();
        world.query::<(&Pos, &Vel)>().each(|_, _| {});
        let e = world.spawn((Pos(7.0), Vel(7.0)));
        assert_eq!(world.get::<Vel>(e), &Vel(7.0));
        assert_eq!(world.query::<(&Pos, &Vel)>().count(), 16);
    }
}
