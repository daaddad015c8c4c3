//! # Archetype Chunk Storage
//!
//! Entities with the same type set share an archetype. An archetype stores
//! its entities in chunks: one pool block each, laid out column by column.
//!
//! ```text
//! chunk (one PoolBlock, e.g. 16 KiB)
//! ┌──────────────┬──────────────────┬──────────────────┬─────┐
//! │ EntityId × N │ Position × N     │ Velocity × N     │ pad │
//! └──────────────┴──────────────────┴──────────────────┴─────┘
//!  offsets[0]     offsets[1]         offsets[2]
//! ```
//!
//! `N` and the offsets are planned per pool class with a [`StructArena`]
//! recording pass. The planned tables are copied into the storage's metadata
//! [`BlockArena`], so an archetype holds no heap tables of its own beyond its
//! type descriptions.
//!
//! Rows are kept dense: removal swaps the last row of the chunk into the
//! hole, and a chunk that empties goes straight back to its pool.

// SAFETY: Component columns are raw, type-erased regions of pool blocks.
// Every access goes through the planned layout and the registered hooks.
#![allow(unsafe_code)]

use std::any::TypeId;
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

use super::component::Component;
use super::entity::EntityId;
use super::type_set::TypeSet;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::memory::{BlockArena, PoolBlock, PoolClass, StructArena, BLOCK_ALIGN};
use crate::types::{TypeDescription, TypeIndex, TypeRegistry};

/// Dense handle to an archetype within one storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// Position in the storage's archetype list.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Read-only table in the storage's metadata arena.
///
/// Valid while the arena holds its blocks. The storage drops every archetype
/// before it resets or drops the arena.
struct MetaSlice<T> {
    ptr: NonNull<T>,
    len: usize,
}

impl<T> Clone for MetaSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MetaSlice<T> {}

// SAFETY: immutable after creation; the data is `T` itself.
unsafe impl<T: Sync> Send for MetaSlice<T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for MetaSlice<T> {}

impl<T: Copy> MetaSlice<T> {
    fn copy_into(arena: &mut BlockArena<'_>, values: &[T]) -> StorageResult<Self> {
        let ptr = arena.alloc_slice_copy(values).ok_or_else(|| {
            tracing::warn!(len = values.len(), "archetype metadata arena exhausted");
            StorageError::MetadataExhausted
        })?;
        Ok(Self {
            ptr,
            len: values.len(),
        })
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        // SAFETY: `len` initialized values copied in by `copy_into`; the arena
        // outlives `self` (see type docs).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Chunk layout for one pool class.
#[derive(Clone, Copy)]
struct ChunkLayout {
    capacity: usize,
    /// `offsets[0]`: entity column; `offsets[1 + c]`: component column `c`.
    offsets: MetaSlice<usize>,
}

/// Plans how many rows fit into `block_size` bytes and where each column
/// starts. Returns `None` if not even one row fits.
fn plan_chunk(block_size: usize, descs: &[Arc<TypeDescription>]) -> Option<(usize, Vec<usize>)> {
    let row_size = descs
        .iter()
        .map(|desc| desc.size())
        .sum::<usize>()
        .checked_add(std::mem::size_of::<EntityId>())?;

    // Start from the padding-free estimate and back off until padding fits.
    let mut capacity = block_size / row_size;
    while capacity > 0 {
        let mut arena = StructArena::new();
        if let Some(offsets) = record_columns(&mut arena, capacity, descs) {
            if arena.capacity() <= block_size {
                return Some((capacity, offsets));
            }
        }
        capacity -= 1;
    }
    None
}

fn record_columns(arena: &mut StructArena, capacity: usize, descs: &[Arc<TypeDescription>]) -> Option<Vec<usize>> {
    let mut offsets = Vec::with_capacity(descs.len() + 1);
    offsets.push(arena.record_array::<EntityId>(capacity)?);
    for desc in descs {
        offsets.push(arena.record(desc.size().checked_mul(capacity)?, desc.alignment())?);
    }
    Some(offsets)
}

/// Column of a Rust component type, if the archetype stores it.
fn typed_column<C: Component>(
    registry: &TypeRegistry,
    columns: &[TypeIndex],
    descs: &[Arc<TypeDescription>],
) -> Option<usize> {
    let index = registry.component_index::<C>()?;
    let column = columns.binary_search(&index).ok()?;
    (descs[column].rust_type() == Some(TypeId::of::<C>())).then_some(column)
}

/// One pool block of rows.
pub struct Chunk {
    block: PoolBlock,
    class: PoolClass,
    layout: ChunkLayout,
    len: usize,
}

impl Chunk {
    /// Number of live rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for chunks reachable through a storage: empty chunks
    /// are returned to their pool.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of rows.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Pool class the block came from.
    #[inline]
    #[must_use]
    pub fn class(&self) -> PoolClass {
        self.class
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len == self.layout.capacity
    }

    /// Entities of the live rows, in row order.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        // SAFETY: the entity column is aligned for EntityId and its first
        // `len` slots are written by `Archetype::set_entity` before any read.
        unsafe { std::slice::from_raw_parts(self.entity_ptr().as_ptr(), self.len) }
    }

    #[inline]
    fn entity_ptr(&self) -> NonNull<EntityId> {
        self.column_base(0).cast()
    }

    /// Start of column `offsets[slot]`.
    #[inline]
    fn column_base(&self, offset_slot: usize) -> NonNull<u8> {
        let offset = self.layout.offsets.as_slice()[offset_slot];
        // SAFETY: planned offsets lie inside the block.
        unsafe { NonNull::new_unchecked(self.block.as_ptr().as_ptr().add(offset)) }
    }

    /// Address of `row` in component column `column`.
    #[inline]
    fn cell(&self, column: usize, size: usize, row: usize) -> NonNull<u8> {
        debug_assert!(row < self.layout.capacity);
        // SAFETY: row < capacity, so the cell lies inside the column.
        unsafe { NonNull::new_unchecked(self.column_base(column + 1).as_ptr().add(row * size)) }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("class", &self.class)
            .field("len", &self.len)
            .field("capacity", &self.layout.capacity)
            .finish()
    }
}

/// All entities sharing one type set.
pub struct Archetype<'ctx> {
    context: &'ctx Context,
    id: ArchetypeId,
    types: TypeSet,
    /// Non-tag members of `types`, sorted; one column each.
    columns: MetaSlice<TypeIndex>,
    /// Per-column value size.
    sizes: MetaSlice<usize>,
    descs: Vec<Arc<TypeDescription>>,
    /// Indexed by [`PoolClass::index`]; `None` if a row does not fit the class.
    layouts: [Option<ChunkLayout>; 3],
    row_size: usize,
    chunks: Vec<Chunk>,
    len: usize,
}

impl<'ctx> Archetype<'ctx> {
    pub(crate) fn new(
        context: &'ctx Context,
        id: ArchetypeId,
        types: TypeSet,
        meta: &mut BlockArena<'_>,
    ) -> StorageResult<Self> {
        let registry = context.registry();
        let mut columns = Vec::with_capacity(types.len());
        let mut descs = Vec::with_capacity(types.len());
        for index in types.iter() {
            let desc = registry.get_type_desc(index).ok_or(StorageError::UnknownType(index))?;
            if desc.is_tag() {
                continue;
            }
            if desc.alignment() > BLOCK_ALIGN {
                return Err(StorageError::AlignmentTooLarge {
                    name: desc.name().to_owned(),
                    align: desc.alignment(),
                    max: BLOCK_ALIGN,
                });
            }
            columns.push(index);
            descs.push(desc);
        }

        let sizes: Vec<usize> = descs.iter().map(|desc| desc.size()).collect();
        let row_size = sizes.iter().sum::<usize>() + std::mem::size_of::<EntityId>();

        // Metadata is append-only: tables copied before a failure below stay in
        // the arena until the storage is cleared or dropped.
        let mut layouts = [None; 3];
        for class in PoolClass::ALL {
            let block_size = context.pool(class).block_size();
            if let Some((capacity, offsets)) = plan_chunk(block_size, &descs) {
                layouts[class.index()] = Some(ChunkLayout {
                    capacity,
                    offsets: MetaSlice::copy_into(meta, &offsets)?,
                });
            }
        }
        if layouts.iter().all(Option::is_none) {
            return Err(StorageError::RowTooLarge { row_size });
        }

        tracing::debug!(
            archetype = id.0,
            types = types.len(),
            columns = columns.len(),
            row_size,
            small = ?layouts[0].map(|l| l.capacity),
            normal = ?layouts[1].map(|l| l.capacity),
            large = ?layouts[2].map(|l| l.capacity),
            "created archetype"
        );

        Ok(Self {
            context,
            id,
            types,
            columns: MetaSlice::copy_into(meta, &columns)?,
            sizes: MetaSlice::copy_into(meta, &sizes)?,
            descs,
            layouts,
            row_size,
            chunks: Vec::new(),
            len: 0,
        })
    }

    /// The archetype's handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Member types, tags included.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if no entity lives here.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per entity, entity id included, padding excluded.
    #[inline]
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Rows per chunk for a pool class; `None` if a row does not fit.
    #[must_use]
    pub fn chunk_capacity(&self, class: PoolClass) -> Option<usize> {
        self.layouts[class.index()].map(|layout| layout.capacity)
    }

    /// Live chunks. Never empty ones.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Smallest class holding `hint` rows, else the largest usable class.
    fn class_for(&self, hint: usize) -> StorageResult<(PoolClass, ChunkLayout)> {
        let mut largest = None;
        for class in PoolClass::ALL {
            if let Some(layout) = self.layouts[class.index()] {
                if layout.capacity >= hint {
                    return Ok((class, layout));
                }
                largest = Some((class, layout));
            }
        }
        largest.ok_or(StorageError::RowTooLarge {
            row_size: self.row_size,
        })
    }

    /// Reserves up to `wanted` rows in one chunk, constructing default
    /// values in every column.
    ///
    /// Entity slots of the claimed rows hold [`EntityId::NULL`] until
    /// [`set_entity`](Self::set_entity).
    pub(crate) fn claim(&mut self, wanted: usize) -> StorageResult<(usize, Range<usize>)> {
        let chunk_index = match self.chunks.iter().rposition(|chunk| !chunk.is_full()) {
            Some(index) => index,
            None => {
                let (class, layout) = self.class_for(wanted)?;
                let block = self.context.pool(class).acquire().ok_or(StorageError::PoolExhausted(class))?;
                self.chunks.push(Chunk {
                    block,
                    class,
                    layout,
                    len: 0,
                });
                self.chunks.len() - 1
            }
        };

        let chunk = &mut self.chunks[chunk_index];
        let rows = chunk.len..chunk.len + wanted.min(chunk.layout.capacity - chunk.len);
        for (column, desc) in self.descs.iter().enumerate() {
            for row in rows.clone() {
                // SAFETY: rows past `len` hold no live value.
                unsafe { desc.construct_at(chunk.cell(column, desc.size(), row)) };
            }
        }
        let entities = chunk.entity_ptr();
        for row in rows.clone() {
            // SAFETY: row < capacity, inside the entity column.
            unsafe { entities.as_ptr().add(row).write(EntityId::NULL) };
        }
        chunk.len = rows.end;
        self.len += rows.len();
        Ok((chunk_index, rows))
    }

    pub(crate) fn set_entity(&mut self, chunk: usize, row: usize, entity: EntityId) {
        let chunk = &mut self.chunks[chunk];
        debug_assert!(row < chunk.len);
        // SAFETY: row < len <= capacity.
        unsafe { chunk.entity_ptr().as_ptr().add(row).write(entity) };
    }

    /// Overwrites `rows` of chunk `dst` with clones of row `src`.
    pub(crate) fn clone_row(&mut self, src: (usize, usize), dst: usize, rows: Range<usize>) {
        let source = &self.chunks[src.0];
        let target = &self.chunks[dst];
        debug_assert!(src.1 < source.len && rows.end <= target.len);
        for (column, desc) in self.descs.iter().enumerate() {
            let from = source.cell(column, desc.size(), src.1);
            for row in rows.clone() {
                let to = target.cell(column, desc.size(), row);
                // SAFETY: `to` holds the default value placed by `claim` and is
                // a different row than `from`; `&mut self` excludes readers.
                unsafe {
                    desc.destruct_at(to);
                    desc.copy_to(to, from);
                }
            }
        }
    }

    /// Moves a live value from outside the archetype into a row claimed by
    /// [`claim`](Self::claim), dropping the default placed there.
    ///
    /// # Safety
    ///
    /// `src` must hold a live value of type `index`, must not lie in this
    /// archetype, and is treated as uninitialized afterwards.
    pub(crate) unsafe fn adopt(&mut self, index: TypeIndex, chunk: usize, row: usize, src: NonNull<u8>) {
        let column = self.column_of(index);
        debug_assert!(column.is_some(), "adopted {index} is not a column");
        let Some(column) = column else {
            return;
        };
        let desc = &self.descs[column];
        let chunk = &self.chunks[chunk];
        debug_assert!(row < chunk.len);
        let dst = chunk.cell(column, desc.size(), row);
        // SAFETY: `dst` holds the default from `claim`; `src` is live and
        // disjoint per the caller.
        unsafe {
            desc.destruct_at(dst);
            desc.relocate_to(dst, src);
        }
    }

    /// Non-tag members, one per column, sorted.
    pub(crate) fn column_types(&self) -> &[TypeIndex] {
        self.columns.as_slice()
    }

    /// Removes a row by moving the chunk's last row into it.
    ///
    /// Values of the `moved_out` types (sorted) were already moved elsewhere
    /// and are not dropped. `moved` is told the new position of every entity
    /// whose row changed: the swapped-in entity, and every entity of a chunk
    /// that took the place of a chunk emptied by this removal.
    pub(crate) fn remove(
        &mut self,
        chunk_index: usize,
        row: usize,
        moved_out: &[TypeIndex],
        mut moved: impl FnMut(EntityId, usize, usize),
    ) {
        let columns = self.columns;
        let chunk = &mut self.chunks[chunk_index];
        debug_assert!(row < chunk.len);
        let last = chunk.len - 1;

        for (column, desc) in self.descs.iter().enumerate() {
            let hole = chunk.cell(column, desc.size(), row);
            let keep = moved_out.binary_search(&columns.as_slice()[column]).is_ok();
            // SAFETY: `row` holds a live value unless moved out; `last` holds
            // one when it differs, and after the move it is treated as
            // uninitialized.
            unsafe {
                if !keep {
                    desc.destruct_at(hole);
                }
                if row != last {
                    desc.relocate_to(hole, chunk.cell(column, desc.size(), last));
                }
            }
        }
        if row != last {
            let entities = chunk.entity_ptr().as_ptr();
            // SAFETY: both rows are below `len`.
            let entity = unsafe {
                let entity = entities.add(last).read();
                entities.add(row).write(entity);
                entity
            };
            moved(entity, chunk_index, row);
        }
        chunk.len = last;
        self.len -= 1;

        if self.chunks[chunk_index].is_empty() {
            let empty = self.chunks.swap_remove(chunk_index);
            self.context.pool(empty.class).release(empty.block);
            if let Some(shifted) = self.chunks.get(chunk_index) {
                for (row, &entity) in shifted.entities().iter().enumerate() {
                    moved(entity, chunk_index, row);
                }
            }
        }
    }

    /// Column holding `index`, if it is a non-tag member.
    fn column_of(&self, index: TypeIndex) -> Option<usize> {
        self.columns.as_slice().binary_search(&index).ok()
    }

    pub(crate) fn component_ptr(&self, index: TypeIndex, chunk: usize, row: usize) -> Option<NonNull<u8>> {
        let column = self.column_of(index)?;
        let chunk = self.chunks.get(chunk)?;
        (row < chunk.len).then(|| chunk.cell(column, self.sizes.as_slice()[column], row))
    }

    pub(crate) fn typed_ptr<C: Component>(&self, chunk: usize, row: usize) -> Option<NonNull<C>> {
        let column = typed_column::<C>(self.context.registry(), self.columns.as_slice(), &self.descs)?;
        let chunk = self.chunks.get(chunk)?;
        (row < chunk.len).then(|| chunk.cell(column, std::mem::size_of::<C>(), row).cast())
    }

    pub(crate) fn view(&self, chunk: usize) -> ChunkView<'_> {
        ChunkView {
            registry: self.context.registry(),
            types: &self.types,
            columns: self.columns.as_slice(),
            descs: &self.descs,
            chunk: &self.chunks[chunk],
        }
    }

    pub(crate) fn view_mut(&mut self, chunk: usize) -> ChunkViewMut<'_> {
        ChunkViewMut {
            registry: self.context.registry(),
            types: &self.types,
            columns: self.columns.as_slice(),
            descs: &self.descs,
            chunk: &mut self.chunks[chunk],
        }
    }
}

impl Drop for Archetype<'_> {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            for (column, desc) in self.descs.iter().enumerate() {
                if desc.is_trivial() {
                    continue;
                }
                for row in 0..chunk.len {
                    // SAFETY: rows below `len` hold live values, dropped once.
                    unsafe { desc.destruct_at(chunk.cell(column, desc.size(), row)) };
                }
            }
            self.context.pool(chunk.class).release(chunk.block);
        }
    }
}

impl fmt::Debug for Archetype<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Read access to one chunk's rows.
pub struct ChunkView<'a> {
    registry: &'a TypeRegistry,
    types: &'a TypeSet,
    columns: &'a [TypeIndex],
    descs: &'a [Arc<TypeDescription>],
    chunk: &'a Chunk,
}

impl<'a> ChunkView<'a> {
    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk.len
    }

    /// Checks if the chunk has no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk.len == 0
    }

    /// Pool class of the chunk.
    #[inline]
    #[must_use]
    pub fn class(&self) -> PoolClass {
        self.chunk.class
    }

    /// Types of the archetype.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &'a TypeSet {
        self.types
    }

    /// Entity of each row.
    #[must_use]
    pub fn entities(&self) -> &'a [EntityId] {
        self.chunk.entities()
    }

    /// Start of the column of `index`. `None` for tags and non-members.
    #[must_use]
    pub fn column_ptr(&self, index: TypeIndex) -> Option<NonNull<u8>> {
        let column = self.columns.binary_search(&index).ok()?;
        Some(self.chunk.column_base(column + 1))
    }

    /// Typed column of a component. `None` if the archetype does not store
    /// it or the registered type is not `C`.
    #[must_use]
    pub fn column<C: Component>(&self) -> Option<&'a [C]> {
        let column = typed_column::<C>(self.registry, self.columns, self.descs)?;
        let base = self.chunk.column_base(column + 1).cast::<C>();
        // SAFETY: the column holds `len` live, aligned values of type C.
        Some(unsafe { std::slice::from_raw_parts(base.as_ptr(), self.chunk.len) })
    }
}

impl fmt::Debug for ChunkView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkView").field("chunk", self.chunk).finish()
    }
}

/// Write access to one chunk's rows.
pub struct ChunkViewMut<'a> {
    registry: &'a TypeRegistry,
    types: &'a TypeSet,
    columns: &'a [TypeIndex],
    descs: &'a [Arc<TypeDescription>],
    chunk: &'a mut Chunk,
}

impl ChunkViewMut<'_> {
    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk.len
    }

    /// Checks if the chunk has no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk.len == 0
    }

    /// Types of the archetype.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &TypeSet {
        self.types
    }

    /// Entity of each row.
    #[must_use]
    pub fn entities(&self) -> &[EntityId] {
        self.chunk.entities()
    }

    /// Start of the column of `index`. `None` for tags and non-members.
    #[must_use]
    pub fn column_ptr(&mut self, index: TypeIndex) -> Option<NonNull<u8>> {
        let column = self.columns.binary_search(&index).ok()?;
        Some(self.chunk.column_base(column + 1))
    }

    /// Typed column of a component.
    #[must_use]
    pub fn column<C: Component>(&self) -> Option<&[C]> {
        let column = typed_column::<C>(self.registry, self.columns, self.descs)?;
        let base = self.chunk.column_base(column + 1).cast::<C>();
        // SAFETY: `len` live values of type C.
        Some(unsafe { std::slice::from_raw_parts(base.as_ptr(), self.chunk.len) })
    }

    /// Mutable typed column of a component.
    #[must_use]
    pub fn column_mut<C: Component>(&mut self) -> Option<&mut [C]> {
        let column = typed_column::<C>(self.registry, self.columns, self.descs)?;
        let base = self.chunk.column_base(column + 1).cast::<C>();
        // SAFETY: `len` live values of type C, exclusively borrowed via `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), self.chunk.len) })
    }

    /// Two distinct columns at once: `A` mutable, `B` shared.
    ///
    /// `None` if either is missing or `A` and `B` are the same column.
    #[must_use]
    pub fn column_pair_mut<A: Component, B: Component>(&mut self) -> Option<(&mut [A], &[B])> {
        let a = typed_column::<A>(self.registry, self.columns, self.descs)?;
        let b = typed_column::<B>(self.registry, self.columns, self.descs)?;
        if a == b {
            return None;
        }
        let len = self.chunk.len;
        let pa = self.chunk.column_base(a + 1).cast::<A>();
        let pb = self.chunk.column_base(b + 1).cast::<B>();
        // SAFETY: distinct columns never overlap; `&mut self` excludes other access.
        unsafe {
            Some((
                std::slice::from_raw_parts_mut(pa.as_ptr(), len),
                std::slice::from_raw_parts(pb.as_ptr(), len),
            ))
        }
    }
}

impl fmt::Debug for ChunkViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkViewMut").field("chunk", &*self.chunk).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Guid, TypeDescription};

    fn desc(n: u128, size: usize, align: usize) -> Arc<TypeDescription> {
        Arc::new(TypeDescription::new(
            Guid::from_u128(0xB000_0000_0000_4000_8000_0000_0000_0000 | n),
            format!("T{n}"),
            size,
            align,
        ))
    }

    #[test]
    fn test_plan_fills_block() {
        let descs = [desc(1, 12, 4), desc(2, 4, 4)];
        let (capacity, offsets) = plan_chunk(4096, &descs).unwrap();
        // 8 + 12 + 4 = 24 bytes per row.
        assert_eq!(capacity, 4096 / 24);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 8 * capacity);
        assert_eq!(offsets[2], 8 * capacity + 12 * capacity);
    }

    #[test]
    fn test_plan_backs_off_for_padding() {
        // 8 + 1 + 64 = 73 bytes per row; the 64-aligned column forces padding.
        let descs = [desc(1, 1, 1), desc(2, 64, 64)];
        let (capacity, offsets) = plan_chunk(4096, &descs).unwrap();
        assert!(capacity < 4096 / 73 + 1);
        assert_eq!(offsets[2] % 64, 0);
        assert!(offsets[2] + 64 * capacity <= 4096);
    }

    #[test]
    fn test_plan_rejects_oversized_row() {
        assert!(plan_chunk(256, &[desc(1, 512, 8)]).is_none());
        // Only the entity column.
        assert_eq!(plan_chunk(256, &[]).map(|(n, _)| n), Some(32));
    }
}
