//! # Entity Management
//!
//! Entities are lightweight identifiers consisting of:
//! - A slot index into the entity table
//! - A generation counter for safe reuse
//!
//! The table maps each live slot to where its components sit.

use std::fmt;

/// Unique identifier for an entity.
///
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation, bumped each time the slot is freed
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates an entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Slot index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation of the slot when the ID was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("EntityId(NULL)")
        } else {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        }
    }
}

/// Where an entity's components live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub archetype: u32,
    pub chunk: u32,
    pub slot: u32,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    generation: u32,
    location: Option<Location>,
}

/// Slot table with a free list, in the style of a generational arena.
#[derive(Debug, Default)]
pub(crate) struct Entities {
    slots: Vec<Slot>,
    /// Freed slot indices, reused LIFO.
    free: Vec<u32>,
    alive: usize,
}

impl Entities {
    /// Index `u32::MAX` is reserved so no live ID equals [`EntityId::NULL`].
    const MAX_SLOTS: usize = u32::MAX as usize;

    pub fn len(&self) -> usize {
        self.alive
    }

    /// How many more entities can be allocated.
    pub fn available(&self) -> usize {
        self.free.len() + (Self::MAX_SLOTS - self.slots.len())
    }

    pub fn allocate(&mut self, location: Location) -> Option<EntityId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() >= Self::MAX_SLOTS {
                    return None;
                }
                let index = u32::try_from(self.slots.len()).ok()?;
                self.slots.push(Slot {
                    generation: 0,
                    location: None,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.location = Some(location);
        self.alive += 1;
        Some(EntityId::new(index, slot.generation))
    }

    /// Frees a live entity, returning where it was.
    pub fn free(&mut self, id: EntityId) -> Option<Location> {
        let slot = self.live_slot_mut(id)?;
        let location = slot.location.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.alive -= 1;
        Some(location)
    }

    pub fn location(&self, id: EntityId) -> Option<Location> {
        if id.is_null() {
            return None;
        }
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.location
    }

    /// Points a live entity at a new location after its data moved.
    pub fn relocate(&mut self, id: EntityId, location: Location) {
        if let Some(slot) = self.live_slot_mut(id) {
            slot.location = Some(location);
        }
    }

    /// Frees every live entity. Old IDs stay invalid.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.location.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                #[allow(clippy::cast_possible_truncation)]
                self.free.push(index as u32);
            }
        }
        self.alive = 0;
    }

    fn live_slot_mut(&mut self, id: EntityId) -> Option<&mut Slot> {
        if id.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(id.index() as usize)?;
        (slot.generation == id.generation() && slot.location.is_some()).then_some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HERE: Location = Location {
        archetype: 0,
        chunk: 0,
        slot: 0,
    };

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(!id.is_null());
        assert!(EntityId::default().is_null());
    }

    #[test]
    fn test_freed_slot_is_reused_with_new_generation() {
        let mut entities = Entities::default();
        let a = entities.allocate(HERE).unwrap();
        assert_eq!(entities.free(a), Some(HERE));
        assert_eq!(entities.free(a), None);

        let b = entities.allocate(HERE).unwrap();
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert_eq!(entities.location(a), None);
        assert_eq!(entities.location(b), Some(HERE));
    }

    #[test]
    fn test_relocate_ignores_stale_ids() {
        let mut entities = Entities::default();
        let a = entities.allocate(HERE).unwrap();
        let moved = Location { slot: 7, ..HERE };
        entities.relocate(a, moved);
        assert_eq!(entities.location(a), Some(moved));

        let _ = entities.free(a);
        entities.relocate(a, HERE);
        assert_eq!(entities.location(a), None);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let mut entities = Entities::default();
        let ids: Vec<_> = (0..4).map(|_| entities.allocate(HERE).unwrap()).collect();
        entities.clear();
        assert_eq!(entities.len(), 0);
        assert!(ids.iter().all(|&id| entities.location(id).is_none()));
        assert_eq!(entities.available(), Entities::MAX_SLOTS);
    }
}
