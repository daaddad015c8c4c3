//! # Memory Management
//!
//! Pools and arenas backing every component chunk and metadata table.
//!
//! ## Layers
//!
//! ```text
//! BlockPool (small / normal / large)      <- owned by Context
//!   ├── PoolBlock / PooledBuffer           <- single-owner block handles
//!   └── BlockArena                         <- chain of pool blocks
//! FixedArena                               <- one buffer, lock-free bump
//! StructArena                              <- record sizes, allocate once
//! ```
//!
//! All arenas share one allocation contract: `allocate(size, align)` returns
//! `None` for zero sizes, zero or non-power-of-two alignments, and requests
//! that do not fit. Alignment is computed on the absolute address, so the
//! returned pointer is aligned regardless of the buffer's base alignment.

mod arena;
mod block_arena;
mod buffer;
mod pool;
mod struct_arena;

pub use arena::FixedArena;
pub use block_arena::BlockArena;
pub use buffer::AlignedBuffer;
pub use pool::{BlockPool, PoolBlock, PoolClass, PooledBuffer};
pub use struct_arena::StructArena;

/// Base alignment of every pool block and backing chunk.
pub const BLOCK_ALIGN: usize = 64;

/// Computes the aligned placement of `size` bytes after `cursor`.
///
/// `base` is the address the cursor is relative to. Returns the aligned
/// offset and the new cursor, or `None` if the parameters are invalid or the
/// request would end past `capacity`. Every step is overflow-checked.
#[inline]
pub(crate) fn bump(
    base: usize,
    cursor: usize,
    capacity: usize,
    size: usize,
    align: usize,
) -> Option<(usize, usize)> {
    if size == 0 || !align.is_power_of_two() {
        return None;
    }
    let limit = capacity.checked_sub(size)?;
    let addr = base.checked_add(cursor)?;
    let aligned = addr.checked_add(align - 1)? & !(align - 1);
    let offset = aligned - base;
    if offset > limit {
        return None;
    }
    Some((offset, offset + size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_rejects_bad_alignment() {
        assert_eq!(bump(0, 0, 64, 8, 0), None);
        assert_eq!(bump(0, 0, 64, 8, 3), None);
        assert_eq!(bump(0, 0, 64, 8, 6), None);
    }

    #[test]
    fn test_bump_rejects_zero_and_oversized() {
        assert_eq!(bump(0, 0, 64, 0, 8), None);
        assert_eq!(bump(0, 0, 64, 65, 1), None);
        assert_eq!(bump(0, 60, 64, 8, 1), None);
    }

    #[test]
    fn test_bump_aligns_absolute_address() {
        // Base at 4: first 16-aligned address is 16, offset 12.
        assert_eq!(bump(4, 0, 64, 8, 16), Some((12, 20)));
        assert_eq!(bump(0, 1, 64, 4, 4), Some((4, 8)));
    }

    #[test]
    fn test_bump_overflow_is_rejected() {
        assert_eq!(bump(usize::MAX - 2, 0, 64, 1, 8), None);
        assert_eq!(bump(0, usize::MAX, usize::MAX, 1, 1), None);
    }
}
