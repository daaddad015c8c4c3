//! # Block Arena
//!
//! Growable bump arena made of pool blocks.
//!
//! ```text
//! blocks: [B0 full][B1 full][B2 ....cursor....]
//!                            ^ current = blocks.last()
//! ```
//!
//! When a request does not fit in the current block, a new block is taken
//! from the pool and allocation continues at its start. Allocations never
//! span two blocks. `reset` hands every block back to the pool.

// SAFETY: Hands out raw regions of pool blocks owned by the arena.
#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::bump;
use super::pool::{BlockPool, PoolBlock};

/// A bump arena backed by a chain of pool blocks.
///
/// Pointers stay valid until [`reset`](Self::reset) or drop: blocks never
/// move once acquired.
///
/// # Thread Safety
///
/// NOT thread-safe; allocation takes `&mut self`.
pub struct BlockArena<'p> {
    pool: &'p BlockPool,
    /// Blocks in acquisition order; the last one is current.
    blocks: Vec<PoolBlock>,
    /// Offset into the current block.
    cursor: usize,
}

impl<'p> BlockArena<'p> {
    /// Creates an empty arena drawing blocks from `pool`.
    #[must_use]
    pub fn new(pool: &'p BlockPool) -> Self {
        Self {
            pool,
            blocks: Vec::new(),
            cursor: 0,
        }
    }

    /// The pool blocks come from.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &'p BlockPool {
        self.pool
    }

    /// Usable bytes per block.
    #[inline]
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.pool.block_size()
    }

    /// Number of blocks currently held.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes used in the current block.
    #[inline]
    #[must_use]
    pub fn used_in_current(&self) -> usize {
        self.cursor
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns `None` for invalid parameters, for requests that can never fit
    /// in one block, or when the pool is exhausted.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let capacity = self.pool.block_size();

        if let Some(block) = self.blocks.last() {
            let base = block.as_ptr().as_ptr() as usize;
            if let Some((offset, next)) = bump(base, self.cursor, capacity, size, align) {
                self.cursor = next;
                // SAFETY: offset + size <= block size, checked by `bump`.
                return NonNull::new(unsafe { block.as_ptr().as_ptr().add(offset) });
            }
        }

        // Would it fit in an empty block? If not, don't waste one.
        bump(0, 0, capacity, size, align)?;

        let block = self.pool.acquire()?;
        let base = block.as_ptr().as_ptr() as usize;
        let Some((offset, next)) = bump(base, 0, capacity, size, align) else {
            self.pool.release(block);
            return None;
        };
        // SAFETY: offset + size <= block size, checked by `bump`.
        let ptr = unsafe { block.as_ptr().as_ptr().add(offset) };
        self.blocks.push(block);
        self.cursor = next;
        NonNull::new(ptr)
    }

    /// Copies `values` into the arena.
    ///
    /// An empty slice yields a dangling, aligned pointer and consumes nothing.
    pub fn alloc_slice_copy<T: Copy>(&mut self, values: &[T]) -> Option<NonNull<T>> {
        let size = std::mem::size_of_val(values);
        if size == 0 {
            return Some(NonNull::dangling());
        }
        let ptr = self.allocate(size, std::mem::align_of::<T>())?.cast::<T>();
        // SAFETY: fresh region of `values.len()` aligned Ts, no overlap.
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), ptr.as_ptr(), values.len()) };
        Some(ptr)
    }

    /// Returns every block to the pool and clears the arena.
    pub fn reset(&mut self) {
        for block in self.blocks.drain(..) {
            self.pool.release(block);
        }
        self.cursor = 0;
    }
}

impl Drop for BlockArena<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for BlockArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockArena")
            .field("blocks", &self.blocks.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> BlockPool {
        BlockPool::new(PoolConfig {
            block_size: 256,
            blocks_per_chunk: 4,
            max_blocks: Some(8),
        })
    }

    #[test]
    fn test_first_allocation_takes_a_block() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        assert_eq!(arena.block_count(), 0);

        let p = arena.allocate(16, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_overflow_provisions_second_block() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);

        let mut regions = Vec::new();
        for _ in 0..5 {
            // 5 * 100 > 256: spills into later blocks.
            let p = arena.allocate(100, 4).unwrap().as_ptr() as usize;
            regions.push(p);
        }
        assert_eq!(arena.block_count(), 3);

        // No allocation spans a block boundary.
        for p in regions {
            assert!(arena.blocks.iter().any(|b| {
                let start = b.as_ptr().as_ptr() as usize;
                start <= p && p + 100 <= start + 256
            }));
        }
    }

    #[test]
    fn test_new_block_starts_at_offset_zero() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        let _ = arena.allocate(200, 8).unwrap();
        let p = arena.allocate(100, 8).unwrap();
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.used_in_current(), 100);
        assert_eq!(p, pool_block_start(&arena));
    }

    fn pool_block_start(arena: &BlockArena<'_>) -> NonNull<u8> {
        arena.blocks.last().unwrap().as_ptr()
    }

    #[test]
    fn test_oversized_request_keeps_state() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        assert!(arena.allocate(257, 1).is_none());
        assert!(arena.allocate(8, 3).is_none());
        assert_eq!(arena.block_count(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_reset_returns_blocks() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        for _ in 0..6 {
            let _ = arena.allocate(200, 8).unwrap();
        }
        assert_eq!(pool.outstanding(), 6);

        arena.reset();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(pool.outstanding(), 0);

        // The pool is reused, not grown.
        let _ = arena.allocate(8, 8).unwrap();
        assert_eq!(pool.reserved_blocks(), 8);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        for _ in 0..8 {
            let _ = arena.allocate(256, 1).unwrap();
        }
        assert!(arena.allocate(1, 1).is_none());
    }

    #[test]
    fn test_drop_returns_blocks() {
        let pool = pool();
        {
            let mut arena = BlockArena::new(&pool);
            let _ = arena.allocate(64, 8).unwrap();
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_alloc_slice_copy() {
        let pool = pool();
        let mut arena = BlockArena::new(&pool);
        let ptr = arena.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
        // SAFETY: three u32 were just copied there.
        let slice = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 3) };
        assert_eq!(slice, &[1, 2, 3]);
        assert!(arena.alloc_slice_copy::<u64>(&[]).is_some());
    }
}
