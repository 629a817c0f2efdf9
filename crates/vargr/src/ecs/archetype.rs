//! # Archetype — Grouping Entities by Component Signature
//!
//! An archetype is a table holding every entity whose component-type-set is
//! exactly its own. Each component type gets one dense column; the
//! `entities` vector runs parallel to them.
//!
//! ```text
//! Archetype { components: [Position, Velocity] }
//!
//! columns:
//!   Position: [pos0, pos1, pos2]   ← Vec<Position>
//!   Velocity: [vel0, vel1, vel2]   ← Vec<Velocity>
//! entities:   [e0,   e1,   e2  ]
//! ```
//!
//! All columns have the same length and index `i` in each of them belongs to
//! the same entity. Rows are removed with swap-remove, so row order is only
//! stable between structural mutations.
//!
//! Archetypes are created lazily and never destroyed. Each one remembers the
//! archetype reached by adding or removing a given component (its "edges"),
//! so repeated migrations along the same path skip the set lookup.

use std::collections::HashMap;
use std::fmt;

use super::component::{
    Component, ComponentId, ErasedColumn, TypedColumn, downcast_column, downcast_column_mut,
};
use super::entity::Entity;

/// Order-independent hash of an archetype's component set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ArchetypeId(pub u64);

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({:016x})", self.0)
    }
}

/// Hash a component set. The input is sorted first, so `[A, B]` and `[B, A]`
/// produce the same id.
pub(crate) fn archetype_id(components: &[ComponentId]) -> ArchetypeId {
    let mut sorted = components.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    // FNV-1a over the little-endian ids.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for id in sorted {
        for byte in id.0.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    ArchetypeId(hash)
}

/// Column map keyed by component id. Queries temporarily take columns out of
/// it and put them back afterwards.
pub(crate) type ColumnMap = HashMap<ComponentId, Box<dyn ErasedColumn>>;

pub(crate) struct Archetype {
    id: ArchetypeId,
    /// Sorted, deduplicated component set.
    components: Vec<ComponentId>,
    pub columns: ColumnMap,
    pub entities: Vec<Entity>,
    add_edges: HashMap<ComponentId, usize>,
    remove_edges: HashMap<ComponentId, usize>,
}

impl Archetype {
    /// `components` must be sorted and have one column each in `columns`.
    pub fn new(components: Vec<ComponentId>, columns: ColumnMap) -> Self {
        debug_assert!(components.windows(2).all(|w| w[0] < w[1]));
        debug_assert_eq!(components.len(), columns.len());
        Self {
            id: archetype_id(&components),
            components,
            columns,
            entities: Vec::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    /// Superset of `required`, disjoint from `excluded`.
    pub fn matches(&self, required: &[ComponentId], excluded: &[ComponentId]) -> bool {
        required.iter().all(|&id| self.has_component(id))
            && !excluded.iter().any(|&id| self.has_component(id))
    }

    pub fn column<T: Component>(&self, id: ComponentId) -> Option<&TypedColumn<T>> {
        self.columns.get(&id).map(|c| downcast_column::<T>(c.as_ref()))
    }

    pub fn column_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut TypedColumn<T>> {
        self.columns
            .get_mut(&id)
            .map(|c| downcast_column_mut::<T>(c.as_mut()))
    }

    /// Push one component value; callers push every column of a row before
    /// anything reads it.
    pub fn push_value<T: Component>(&mut self, id: ComponentId, value: T) {
        match self.column_mut::<T>(id) {
            Some(col) => col.data.push(value),
            None => panic!(
                "archetype {:?} has no column for `{}`",
                self.id,
                std::any::type_name::<T>()
            ),
        }
    }

    pub fn add_edge(&self, id: ComponentId) -> Option<usize> {
        self.add_edges.get(&id).copied()
    }

    pub fn remove_edge(&self, id: ComponentId) -> Option<usize> {
        self.remove_edges.get(&id).copied()
    }

    pub fn set_add_edge(&mut self, id: ComponentId, target: usize) {
        self.add_edges.insert(id, target);
    }

    pub fn set_remove_edge(&mut self, id: ComponentId, target: usize) {
        self.remove_edges.insert(id, target);
    }

    /// Swap-remove the row at `row`, dropping its components. Returns the
    /// entity moved into the vacated row, if any.
    pub fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        for column in self.columns.values_mut() {
            column.swap_remove_drop(row);
        }
        self.swap_remove_entity(row)
    }

    /// Move the row at `row` into `dst`. Columns `dst` lacks are dropped,
    /// except `skip`, whose value the caller already took out. Returns the
    /// entity swapped into `row` here, if any.
    pub fn move_row_to(
        &mut self,
        row: usize,
        dst: &mut Archetype,
        skip: Option<ComponentId>,
    ) -> Option<Entity> {
        for (id, column) in self.columns.iter_mut() {
            if Some(*id) == skip {
                continue;
            }
            match dst.columns.get_mut(id) {
                Some(target) => column.move_row(row, target.as_mut()),
                None => column.swap_remove_drop(row),
            }
        }
        dst.entities.push(self.entities[row]);
        self.swap_remove_entity(row)
    }

    fn swap_remove_entity(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Column lengths all equal the entity count.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.columns.values().all(|c| c.len() == self.entities.len())
    }
}

/// Borrow two distinct elements of a slice mutably.
pub(crate) fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "pair_mut called with the same index twice");
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentRegistry;

    fn archetype_for(reg: &ComponentRegistry, ids: &[ComponentId]) -> Archetype {
        let mut sorted = ids.to_vec();
        sorted.sort();
        let columns = sorted
            .iter()
            .map(|&id| (id, reg.info(id).new_column()))
            .collect();
        Archetype::new(sorted, columns)
    }

    fn entity(index: u32) -> Entity {
        Entity {
            index,
            generation: 0,
        }
    }

    #[test]
    fn id_is_order_independent() {
        let a = ComponentId(3);
        let b = ComponentId(11);
        assert_eq!(archetype_id(&[a, b]), archetype_id(&[b, a]));
        assert_ne!(archetype_id(&[a]), archetype_id(&[a, b]));
        assert_ne!(archetype_id(&[]), archetype_id(&[a]));
    }

    #[test]
    fn superset_and_exclusion_matching() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<u32>();
        let vel = reg.register::<u64>();
        let tag = reg.register::<bool>();
        let arch = archetype_for(&reg, &[pos, vel, tag]);

        assert!(arch.matches(&[pos, vel], &[]));
        assert!(!arch.matches(&[pos, vel], &[tag]));
        assert!(arch.matches(&[], &[]));
    }

    #[test]
    fn swap_remove_reports_moved_entity() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<u32>();
        let mut arch = archetype_for(&reg, &[id]);
        for i in 0..3 {
            arch.entities.push(entity(i));
            arch.push_value(id, i * 10);
        }

        assert_eq!(arch.swap_remove(0), Some(entity(2)));
        assert_eq!(arch.column::<u32>(id).unwrap().as_slice(), &[20, 10]);
        assert_eq!(arch.swap_remove(1), None);
        assert!(arch.is_consistent());
    }

    #[test]
    fn move_row_drops_missing_columns() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<u32>();
        let b = reg.register::<String>();
        let mut src = archetype_for(&reg, &[a, b]);
        let mut dst = archetype_for(&reg, &[a]);

        src.entities.push(entity(0));
        src.push_value(a, 1u32);
        src.push_value(b, "gone".to_string());

        assert_eq!(src.move_row_to(0, &mut dst, None), None);
        assert!(src.is_empty() && src.is_consistent());
        assert_eq!(dst.entities, vec![entity(0)]);
        assert_eq!(dst.column::<u32>(a).unwrap().as_slice(), &[1]);
        assert!(dst.is_consistent());
    }

    #[test]
    fn pair_mut_either_order() {
        let mut v = vec![1, 2, 3];
        let (x, y) = pair_mut(&mut v, 2, 0);
        std::mem::swap(x, y);
        assert_eq!(v, vec![3, 2, 1]);
    }
}
