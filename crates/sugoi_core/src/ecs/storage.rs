//! # Entity Storage
//!
//! Entities as typed bags of components, grouped by archetype.
//!
//! ```text
//! Storage<'ctx>
//!   ├── entities   EntityId -> (archetype, chunk, row)
//!   ├── archetypes [Archetype]  -> chunks (pool blocks)
//!   ├── lookup     TypeSet -> ArchetypeId
//!   └── meta       BlockArena (small pool): layout tables
//! ```
//!
//! The storage borrows its [`Context`]: pools and registry outlive it by
//! construction.

// SAFETY: Typed access dereferences column cells resolved by the archetype.
#![allow(unsafe_code)]
// Entity table positions are u32 by construction.
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;

use super::archetype::{Archetype, ArchetypeId, ChunkView, ChunkViewMut};
use super::component::Component;
use super::entity::{Entities, EntityId, Location};
use super::type_set::TypeSet;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::memory::{BlockArena, PoolClass};
use crate::types::TypeIndex;

/// Archetype/chunk entity storage on top of a [`Context`].
///
/// # Thread Safety
///
/// Single owner: every mutation takes `&mut self`.
///
/// # Example
///
/// ```rust,ignore
/// let context = Context::with_defaults();
/// let position = context.registry().register_component::<Position>()?;
///
/// let mut storage = Storage::new(&context);
/// let entity = storage.spawn(&[position])?;
/// storage.get_mut::<Position>(entity).unwrap().x = 1.0;
/// ```
pub struct Storage<'ctx> {
    context: &'ctx Context,
    entities: Entities,
    /// Declared before `meta`: archetypes read their tables from it and must
    /// drop first.
    archetypes: Vec<Archetype<'ctx>>,
    lookup: HashMap<TypeSet, ArchetypeId>,
    meta: BlockArena<'ctx>,
}

impl<'ctx> Storage<'ctx> {
    /// Creates an empty storage. Nothing is allocated until the first spawn.
    #[must_use]
    pub fn new(context: &'ctx Context) -> Self {
        Self {
            context,
            entities: Entities::default(),
            archetypes: Vec::new(),
            lookup: HashMap::new(),
            meta: BlockArena::new(context.pool(PoolClass::Small)),
        }
    }

    /// The context the storage draws from.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Checks if no entity is alive.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of archetypes created so far.
    #[inline]
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// An archetype by handle.
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype<'ctx>> {
        self.archetypes.get(id.index())
    }

    /// Finds or creates the archetype for a type set.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownType`] for indices the registry never issued
    /// - [`StorageError::AlignmentTooLarge`] for over-aligned components
    /// - [`StorageError::RowTooLarge`] if no pool block holds one entity
    /// - [`StorageError::MetadataExhausted`] if layout tables do not fit
    pub fn archetype_for(&mut self, types: &[TypeIndex]) -> StorageResult<ArchetypeId> {
        let types = TypeSet::from(types);
        if let Some(&id) = self.lookup.get(&types) {
            return Ok(id);
        }
        let id = ArchetypeId(u32::try_from(self.archetypes.len()).map_err(|_| StorageError::MetadataExhausted)?);
        let archetype = Archetype::new(self.context, id, types.clone(), &mut self.meta)?;
        self.archetypes.push(archetype);
        self.lookup.insert(types, id);
        Ok(id)
    }

    /// Spawns one entity with default-constructed components.
    ///
    /// # Errors
    ///
    /// Same as [`spawn_batch`](Self::spawn_batch).
    pub fn spawn(&mut self, types: &[TypeIndex]) -> StorageResult<EntityId> {
        self.spawn_batch(types, 1, |_, _| {})?
            .pop()
            .ok_or(StorageError::EntitiesExhausted)
    }

    /// Spawns `count` entities with default-constructed components.
    ///
    /// `init` runs once per chunk touched, with a view of the chunk and the
    /// range of rows just spawned in it.
    ///
    /// On error nothing stays spawned.
    ///
    /// # Errors
    ///
    /// Everything [`archetype_for`](Self::archetype_for) returns, plus
    /// [`StorageError::PoolExhausted`] and [`StorageError::EntitiesExhausted`].
    pub fn spawn_batch<F>(&mut self, types: &[TypeIndex], count: usize, mut init: F) -> StorageResult<Vec<EntityId>>
    where
        F: FnMut(ChunkViewMut<'_>, Range<usize>),
    {
        let id = self.archetype_for(types)?;
        self.spawn_in(id, count, |archetype, chunk, rows| {
            init(archetype.view_mut(chunk), rows);
        })
    }

    /// Spawns `count` copies of a live entity, cloning each component.
    ///
    /// # Errors
    ///
    /// [`StorageError::NoSuchEntity`] if `source` is dead, plus the pool and
    /// entity exhaustion errors of [`spawn_batch`](Self::spawn_batch).
    pub fn instantiate(&mut self, source: EntityId, count: usize) -> StorageResult<Vec<EntityId>> {
        let location = self.entities.location(source).ok_or(StorageError::NoSuchEntity(source))?;
        let src = (location.chunk as usize, location.slot as usize);
        // Spawning only appends rows, so the source row stays put.
        self.spawn_in(ArchetypeId(location.archetype), count, |archetype, chunk, rows| {
            archetype.clone_row(src, chunk, rows);
        })
    }

    fn spawn_in<F>(&mut self, id: ArchetypeId, count: usize, mut fill: F) -> StorageResult<Vec<EntityId>>
    where
        F: FnMut(&mut Archetype<'ctx>, usize, Range<usize>),
    {
        if self.entities.available() < count {
            return Err(StorageError::EntitiesExhausted);
        }

        let mut spawned = Vec::with_capacity(count);
        while spawned.len() < count {
            let archetype = &mut self.archetypes[id.index()];
            let (chunk, rows) = match archetype.claim(count - spawned.len()) {
                Ok(claimed) => claimed,
                Err(error) => {
                    tracing::warn!(%error, spawned = spawned.len(), count, "spawn rolled back");
                    for &entity in spawned.iter().rev() {
                        self.despawn(entity);
                    }
                    return Err(error);
                }
            };
            for row in rows.clone() {
                let location = Location {
                    archetype: id.0,
                    chunk: chunk as u32,
                    slot: row as u32,
                };
                // Cannot fail: availability was checked up front.
                let entity = self.entities.allocate(location).ok_or(StorageError::EntitiesExhausted)?;
                archetype.set_entity(chunk, row, entity);
                spawned.push(entity);
            }
            fill(archetype, chunk, rows);
        }
        Ok(spawned)
    }

    /// Destroys an entity and its components.
    ///
    /// Returns `false` for dead, stale or null IDs.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        let Some(location) = self.entities.free(entity) else {
            return false;
        };
        let entities = &mut self.entities;
        self.archetypes[location.archetype as usize].remove(
            location.chunk as usize,
            location.slot as usize,
            &[],
            |moved, chunk, row| {
                entities.relocate(
                    moved,
                    Location {
                        archetype: location.archetype,
                        chunk: chunk as u32,
                        slot: row as u32,
                    },
                );
            },
        );
        true
    }

    /// Moves an entity to the archetype of its types plus `add` minus
    /// `remove`, returning the new archetype.
    ///
    /// Values of types the entity keeps are moved, not cloned. Added types are
    /// default-constructed and removed ones dropped. A type in both lists is
    /// removed. The entity keeps its ID.
    ///
    /// On error the entity is left untouched.
    ///
    /// # Errors
    ///
    /// [`StorageError::NoSuchEntity`] if `entity` is dead, everything
    /// [`archetype_for`](Self::archetype_for) returns for the new type set,
    /// and [`StorageError::PoolExhausted`].
    pub fn cast(&mut self, entity: EntityId, add: &[TypeIndex], remove: &[TypeIndex]) -> StorageResult<ArchetypeId> {
        let location = self.entities.location(entity).ok_or(StorageError::NoSuchEntity(entity))?;
        let from = ArchetypeId(location.archetype);
        let (src_chunk, src_row) = (location.chunk as usize, location.slot as usize);

        let removed = TypeSet::from(remove);
        let types: TypeSet = self.archetypes[from.index()]
            .types()
            .iter()
            .chain(add.iter().copied())
            .filter(|&index| !removed.contains(index))
            .collect();
        if &types == self.archetypes[from.index()].types() {
            return Ok(from);
        }

        let to = self.archetype_for(types.as_slice())?;
        let (chunk, rows) = self.archetypes[to.index()].claim(1)?;
        let row = rows.start;

        let source = &self.archetypes[from.index()];
        let kept: Vec<(TypeIndex, NonNull<u8>)> = source
            .column_types()
            .iter()
            .filter(|&&index| types.contains(index))
            .filter_map(|&index| source.component_ptr(index, src_chunk, src_row).map(|ptr| (index, ptr)))
            .collect();

        let target = &mut self.archetypes[to.index()];
        for &(index, ptr) in &kept {
            // SAFETY: `ptr` is the entity's live value in another archetype;
            // its row is removed below without dropping moved-out columns.
            unsafe { target.adopt(index, chunk, row, ptr) };
        }
        target.set_entity(chunk, row, entity);
        self.entities.relocate(
            entity,
            Location {
                archetype: to.0,
                chunk: chunk as u32,
                slot: row as u32,
            },
        );

        let moved_out: Vec<TypeIndex> = kept.iter().map(|&(index, _)| index).collect();
        let entities = &mut self.entities;
        self.archetypes[from.index()].remove(src_chunk, src_row, &moved_out, |moved, chunk, row| {
            entities.relocate(
                moved,
                Location {
                    archetype: from.0,
                    chunk: chunk as u32,
                    slot: row as u32,
                },
            );
        });

        tracing::trace!(?entity, from = from.0, to = to.0, "entity cast");
        Ok(to)
    }

    /// Checks if an entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.location(entity).is_some()
    }

    /// Archetype holding an entity.
    #[must_use]
    pub fn archetype_of(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.entities.location(entity).map(|location| ArchetypeId(location.archetype))
    }

    /// Component types of an entity.
    #[must_use]
    pub fn type_set_of(&self, entity: EntityId) -> Option<&TypeSet> {
        let location = self.entities.location(entity)?;
        Some(self.archetypes[location.archetype as usize].types())
    }

    /// A component of an entity.
    ///
    /// `None` if the entity is dead, lacks the component, or the component's
    /// GUID is registered for another Rust type.
    #[must_use]
    pub fn get<C: Component>(&self, entity: EntityId) -> Option<&C> {
        let location = self.entities.location(entity)?;
        let ptr = self.archetypes[location.archetype as usize]
            .typed_ptr::<C>(location.chunk as usize, location.slot as usize)?;
        // SAFETY: live, aligned C; shared borrow of the storage.
        Some(unsafe { &*ptr.as_ptr() })
    }

    /// A component of an entity, mutably.
    #[must_use]
    pub fn get_mut<C: Component>(&mut self, entity: EntityId) -> Option<&mut C> {
        let location = self.entities.location(entity)?;
        let ptr = self.archetypes[location.archetype as usize]
            .typed_ptr::<C>(location.chunk as usize, location.slot as usize)?;
        // SAFETY: live, aligned C; exclusive borrow of the storage.
        Some(unsafe { &mut *ptr.as_ptr() })
    }

    /// Raw address of an entity's component.
    ///
    /// `None` for dead entities, tags and types the entity lacks. The pointer
    /// is valid until the entity is despawned or another entity of its
    /// archetype is.
    #[must_use]
    pub fn component_ptr(&self, entity: EntityId, index: TypeIndex) -> Option<NonNull<u8>> {
        let location = self.entities.location(entity)?;
        self.archetypes[location.archetype as usize].component_ptr(
            index,
            location.chunk as usize,
            location.slot as usize,
        )
    }

    /// Visits every chunk whose archetype has all `filter` types.
    pub fn for_each<F>(&self, filter: &[TypeIndex], mut f: F)
    where
        F: FnMut(ChunkView<'_>),
    {
        let filter = TypeSet::from(filter);
        for archetype in self.archetypes.iter().filter(|a| a.types().is_superset_of(&filter)) {
            for chunk in 0..archetype.chunks().len() {
                f(archetype.view(chunk));
            }
        }
    }

    /// Visits every chunk whose archetype has all `filter` types, mutably.
    pub fn for_each_mut<F>(&mut self, filter: &[TypeIndex], mut f: F)
    where
        F: FnMut(ChunkViewMut<'_>),
    {
        let filter = TypeSet::from(filter);
        for archetype in self.archetypes.iter_mut().filter(|a| a.types().is_superset_of(&filter)) {
            for chunk in 0..archetype.chunks().len() {
                f(archetype.view_mut(chunk));
            }
        }
    }

    /// Destroys every entity and archetype and returns all blocks to their
    /// pools. Old entity IDs stay invalid.
    pub fn clear(&mut self) {
        self.archetypes.clear();
        self.lookup.clear();
        self.entities.clear();
        self.meta.reset();
        tracing::debug!("storage cleared");
    }
}

impl fmt::Debug for Storage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.archetypes.len())
            .field("meta_blocks", &self.meta.block_count())
            .finish()
    }
}
