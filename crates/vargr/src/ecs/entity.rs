//! # Entity — Generational Identifiers
//!
//! An [`Entity`] names one row of component data in exactly one archetype at
//! a time. It does not own anything itself; the [`World`](super::world::World)
//! maps it to its current location.
//!
//! ## Generational Indices
//!
//! Slots are recycled after despawn. Each slot carries a generation counter
//! that is bumped on release, so a handle kept across a despawn no longer
//! matches and every lookup through it fails instead of silently reaching
//! the entity that inherited the slot.
//!
//! ```text
//! Entity { index: 5, generation: 0 }  ← original
//! Entity { index: 5, generation: 1 }  ← after recycle
//! ```

use std::fmt;

/// A lightweight handle to an entity in the [`World`](super::world::World).
///
/// Only valid for the `World` that created it, and only while its generation
/// matches the slot's current generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    /// Slot index in the allocator. Recycled when the entity is despawned.
    pub(crate) index: u32,
    /// Generation counter of the slot at allocation time.
    pub(crate) generation: u32,
}

impl Entity {
    /// Returns the raw slot index. Useful for diagnostics, not for identity.
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack index and generation into one `u64` (generation in the high bits).
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Manages entity ID allocation and recycling.
///
/// ```text
/// generations: [0, 1, 0, 2, 0]   ← one generation per slot ever allocated
/// free_list:   [1, 3]             ← slots available for reuse
/// ```
///
/// Spawning pops from `free_list` when possible, otherwise grows. Despawning
/// bumps the slot's generation and pushes it onto `free_list`.
pub(crate) struct EntityAllocator {
    generations: Vec<u32>,
    free_list: Vec<u32>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Allocate a new [`Entity`], reusing a freed slot if one is available.
    pub fn allocate(&mut self) -> Entity {
        if let Some(index) = self.free_list.pop() {
            // Generation was already bumped on release.
            let generation = self.generations[index as usize];
            Entity { index, generation }
        } else {
            let index = u32::try_from(self.generations.len())
                .unwrap_or_else(|_| panic!("entity index space exhausted"));
            self.generations.push(0);
            Entity {
                index,
                generation: 0,
            }
        }
    }

    /// Release an entity, making its slot available for reuse.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.generations[entity.index as usize];
        *slot = slot.wrapping_add(1);
        self.free_list.push(entity.index);
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.generations
            .get(entity.index as usize)
            .is_some_and(|&g| g == entity.generation)
    }

    pub fn alive_count(&self) -> usize {
        self.generations.len() - self.free_list.len()
    }

    /// Returns the number of free (recyclable) slots.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Returns the total number of slots ever allocated.
    pub fn total_slots(&self) -> usize {
        self.generations.len()
    }
}
