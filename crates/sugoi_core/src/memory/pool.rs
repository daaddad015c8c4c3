//! # Block Pool
//!
//! Fixed block-size allocator that hands out raw blocks to arenas and
//! chunks, and recycles them through a free list.

// SAFETY: Carves raw blocks out of owned backing chunks.
#![allow(unsafe_code)]

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::buffer::AlignedBuffer;
use super::BLOCK_ALIGN;
use crate::config::PoolConfig;

/// Source of [`BlockPool`] identities. Never reused, so a block outliving its
/// pool can never match a later pool.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Size class of a pool.
///
/// The context owns one pool per class; requests are routed to the smallest
/// class whose block fits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
    /// Small blocks for sparse archetypes and short-lived metadata.
    Small,
    /// Default block size.
    Normal,
    /// Large blocks for bulk spawns.
    Large,
}

impl PoolClass {
    /// All classes, smallest first.
    pub const ALL: [Self; 3] = [Self::Small, Self::Normal, Self::Large];

    /// Dense index of the class (0, 1, 2).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Normal => 1,
            Self::Large => 2,
        }
    }
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Small => "small",
            Self::Normal => "normal",
            Self::Large => "large",
        })
    }
}

/// A block handed out by a [`BlockPool`].
///
/// The handle is move-only: the only way to give a block back is
/// [`BlockPool::release`], which consumes it, so a block cannot be released
/// twice. Dropping a handle without releasing it parks the block until the
/// pool itself is dropped.
///
/// Each block remembers the pool that issued it; other pools refuse it.
#[must_use = "blocks must be released back to their pool"]
pub struct PoolBlock {
    ptr: NonNull<u8>,
    len: usize,
    pool: u64,
}

impl PoolBlock {
    /// Start of the block, aligned to [`BLOCK_ALIGN`].
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Block size in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: pools never hand out empty blocks.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for PoolBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBlock")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("pool", &self.pool)
            .finish()
    }
}

// SAFETY: a block is exclusively owned by whoever holds the handle.
unsafe impl Send for PoolBlock {}
// SAFETY: `&PoolBlock` only exposes the address and length.
unsafe impl Sync for PoolBlock {}

/// Mutable pool state guarded by the pool mutex.
struct PoolState {
    /// Backing chunks, each holding `blocks_per_chunk` blocks.
    chunks: Vec<AlignedBuffer>,
    /// Blocks ready for reuse.
    free: Vec<NonNull<u8>>,
    /// Blocks carved out of chunks so far.
    reserved: usize,
    /// Blocks currently handed out.
    outstanding: usize,
}

// SAFETY: the raw pointers in `free` point into `chunks`, owned by the state.
unsafe impl Send for PoolState {}

/// A fixed block-size pool.
///
/// Blocks come from backing chunks allocated on demand; released blocks go
/// onto a free list and are reused. Memory returns to the system only when
/// the pool is dropped.
///
/// # Thread Safety
///
/// The free list is behind a `parking_lot::Mutex`; `acquire` and `release`
/// may be called from any thread.
///
/// # Example
///
/// ```rust,ignore
/// let pool = BlockPool::new(PoolConfig::new(16 * 1024, 32));
///
/// let block = pool.acquire().expect("pool exhausted");
/// // ... use block.as_ptr() ...
/// pool.release(block);
/// ```
pub struct BlockPool {
    id: u64,
    block_size: usize,
    blocks_per_chunk: usize,
    max_blocks: Option<usize>,
    state: Mutex<PoolState>,
}

impl BlockPool {
    /// Creates an empty pool. No memory is allocated until the first acquire.
    ///
    /// The block size is rounded up to a multiple of [`BLOCK_ALIGN`].
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let block_size = config.block_size.max(1).next_multiple_of(BLOCK_ALIGN);
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            block_size,
            blocks_per_chunk: config.blocks_per_chunk.max(1),
            max_blocks: config.max_blocks,
            state: Mutex::new(PoolState {
                chunks: Vec::new(),
                free: Vec::new(),
                reserved: 0,
                outstanding: 0,
            }),
        }
    }

    /// Size of every block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently handed out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Number of blocks on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Blocks carved out of backing chunks so far.
    #[must_use]
    pub fn reserved_blocks(&self) -> usize {
        self.state.lock().reserved
    }

    /// Number of backing chunks allocated from the system.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Takes a block from the free list, growing the pool if it is empty.
    ///
    /// Returns `None` when `max_blocks` is reached or the system allocator
    /// fails. Block contents are unspecified.
    pub fn acquire(&self) -> Option<PoolBlock> {
        let mut state = self.state.lock();
        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let ptr = state.free.pop()?;
        state.outstanding += 1;
        Some(PoolBlock {
            ptr,
            len: self.block_size,
            pool: self.id,
        })
    }

    /// Checks whether this pool issued `block`.
    #[inline]
    #[must_use]
    pub fn owns(&self, block: &PoolBlock) -> bool {
        block.pool == self.id
    }

    /// Returns a block to the free list.
    ///
    /// Returns `false` without touching the free list when `block` was issued
    /// by another pool, which keeps counting it as outstanding.
    pub fn release(&self, block: PoolBlock) -> bool {
        if !self.owns(&block) {
            tracing::error!(
                block_size = self.block_size,
                block_len = block.len,
                "refused a block issued by another pool"
            );
            return false;
        }
        let mut state = self.state.lock();
        let Some(outstanding) = state.outstanding.checked_sub(1) else {
            tracing::error!(block_size = self.block_size, "release with no outstanding blocks");
            return false;
        };
        state.outstanding = outstanding;
        state.free.push(block.ptr);
        true
    }

    /// Acquires a zeroed block wrapped in a guard that releases it on drop.
    pub fn acquire_buffer(&self) -> Option<PooledBuffer<'_>> {
        let block = self.acquire()?;
        // SAFETY: the block is exclusively ours and `len` bytes long.
        unsafe { std::ptr::write_bytes(block.as_ptr().as_ptr(), 0, block.len()) };
        Some(PooledBuffer {
            pool: self,
            block: Some(block),
        })
    }

    /// Allocates one more backing chunk and pushes its blocks on the free list.
    fn grow(&self, state: &mut PoolState) -> Option<()> {
        let budget = match self.max_blocks {
            Some(max) => max.saturating_sub(state.reserved).min(self.blocks_per_chunk),
            None => self.blocks_per_chunk,
        };
        if budget == 0 {
            tracing::warn!(block_size = self.block_size, reserved = state.reserved, "block pool exhausted");
            return None;
        }

        let bytes = self.block_size.checked_mul(budget)?;
        let chunk = match AlignedBuffer::new(bytes, BLOCK_ALIGN) {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::warn!(%error, "block pool failed to grow");
                return None;
            }
        };

        let base = chunk.as_ptr().as_ptr();
        // Reverse so blocks are handed out in address order.
        for i in (0..budget).rev() {
            // SAFETY: i * block_size < bytes, inside the chunk.
            let ptr = unsafe { base.add(i * self.block_size) };
            state.free.extend(NonNull::new(ptr));
        }
        state.chunks.push(chunk);
        state.reserved += budget;

        tracing::debug!(
            block_size = self.block_size,
            blocks = budget,
            reserved = state.reserved,
            "block pool grew"
        );
        Some(())
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("reserved", &state.reserved)
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

/// A pooled byte buffer that returns its block on drop.
///
/// Used for transient I/O staging where a plain `[u8]` of block size is
/// enough.
pub struct PooledBuffer<'p> {
    pool: &'p BlockPool,
    block: Option<PoolBlock>,
}

impl PooledBuffer<'_> {
    /// Releases the block early.
    pub fn release(mut self) {
        if let Some(block) = self.block.take() {
            self.pool.release(block);
        }
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.block {
            // SAFETY: the block was zeroed on acquire and only written as bytes.
            Some(block) => unsafe { std::slice::from_raw_parts(block.as_ptr().as_ptr(), block.len()) },
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.block {
            // SAFETY: exclusive access through `&mut self`.
            Some(block) => unsafe { std::slice::from_raw_parts_mut(block.as_ptr().as_ptr(), block.len()) },
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.release(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(block_size: usize, per_chunk: usize, max: Option<usize>) -> BlockPool {
        BlockPool::new(PoolConfig {
            block_size,
            blocks_per_chunk: per_chunk,
            max_blocks: max,
        })
    }

    #[test]
    fn test_pool_acquire_release() {
        let pool = pool(256, 4, None);

        let b1 = pool.acquire().unwrap();
        assert_eq!(b1.len(), 256);
        assert_eq!(b1.as_ptr().as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(pool.outstanding(), 1);

        pool.release(b1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_foreign_block_is_refused() {
        let small = pool(256, 2, None);
        let big = pool(4096, 2, None);

        let foreign = small.acquire().unwrap();
        let addr = foreign.as_ptr();
        assert!(!big.owns(&foreign));
        assert!(!big.release(foreign));
        assert_eq!(big.outstanding(), 0);
        assert_eq!(big.free_count(), 0);

        // The big pool never hands the small block out.
        let own = big.acquire().unwrap();
        assert_ne!(own.as_ptr(), addr);
        assert!(big.owns(&own));
        assert!(big.release(own));
        assert_eq!(small.outstanding(), 1);
    }

    #[test]
    fn test_pool_full() {
        let pool = pool(256, 2, Some(3));

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.reserved_blocks(), 3);

        pool.release(b);
        let d = pool.acquire().unwrap();
        for block in [a, c, d] {
            pool.release(block);
        }
    }

    #[test]
    fn test_pool_reuse() {
        let pool = pool(512, 1, None);

        let h1 = pool.acquire().unwrap();
        let addr = h1.as_ptr();
        pool.release(h1);

        let h2 = pool.acquire().unwrap();
        assert_eq!(h2.as_ptr(), addr); // Same block reused
        pool.release(h2);
    }

    #[test]
    fn test_repeated_cycles_do_not_grow() {
        let pool = pool(256, 8, None);
        for _ in 0..1000 {
            let block = pool.acquire().unwrap();
            pool.release(block);
        }
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.reserved_blocks(), 8);
    }

    #[test]
    fn test_block_size_rounds_to_block_align() {
        let pool = pool(100, 1, None);
        assert_eq!(pool.block_size(), 128);
    }

    #[test]
    fn test_blocks_are_disjoint() {
        let pool = pool(256, 16, None);
        let mut blocks: Vec<_> = (0..40).map(|_| pool.acquire().unwrap()).collect();
        let mut addrs: Vec<usize> = blocks.iter().map(|b| b.as_ptr().as_ptr() as usize).collect();
        addrs.sort_unstable();
        for pair in addrs.windows(2) {
            assert!(pair[0] + 256 <= pair[1]);
        }
        assert_eq!(pool.chunk_count(), 3);
        for block in blocks.drain(..) {
            pool.release(block);
        }
    }

    #[test]
    fn test_pooled_buffer_returns_on_drop() {
        let pool = pool(256, 2, None);
        {
            let mut buffer = pool.acquire_buffer().unwrap();
            assert!(buffer.iter().all(|&b| b == 0));
            buffer[0] = 42;
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);

        let buffer = pool.acquire_buffer().unwrap();
        assert_eq!(buffer[0], 0, "reacquired buffers are zeroed");
        buffer.release();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = pool(256, 4, None);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let block = pool.acquire().unwrap();
                        pool.release(block);
                    }
                });
            }
        });
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.reserved_blocks() <= 8);
    }
}
