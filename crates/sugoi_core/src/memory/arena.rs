//! # Fixed Arena
//!
//! A lock-free bump allocator over a single fixed buffer.

// SAFETY: Hands out raw regions of an owned buffer.
#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::buffer::AlignedBuffer;
use super::bump;
use crate::error::MemoryError;

/// Default base alignment of a fixed arena's buffer.
const DEFAULT_ALIGN: usize = 16;

/// A bump-pointer arena over one fixed-capacity buffer.
///
/// Allocations are a compare-and-swap on the cursor. Memory is reclaimed all
/// at once by [`reset`](Self::reset) or drop.
///
/// # Thread Safety
///
/// `allocate` takes `&self` and is safe to call from many threads at once:
/// concurrent calls never return overlapping regions. The CAS loop may spin
/// under contention but never blocks.
///
/// # Example
///
/// ```rust,ignore
/// let arena = FixedArena::new(1024 * 1024)?;
///
/// let ptr = arena.allocate(256, 16).expect("fits");
/// arena.reset(); // needs &mut, so no allocation is still borrowed
/// ```
pub struct FixedArena {
    /// The backing storage.
    buffer: AlignedBuffer,
    /// Bytes consumed, including alignment padding.
    cursor: AtomicUsize,
}

impl FixedArena {
    /// Creates an arena with its own `capacity`-byte buffer.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self, MemoryError> {
        Ok(Self::from_buffer(AlignedBuffer::new(capacity, DEFAULT_ALIGN)?))
    }

    /// Creates an arena that bump-allocates out of an existing buffer.
    #[must_use]
    pub fn from_buffer(buffer: AlignedBuffer) -> Self {
        Self {
            buffer,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the bytes consumed so far, padding included.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Start of the backing buffer.
    #[inline]
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.buffer.as_ptr()
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns `None` if `align` is zero or not a power of two, if `size` is
    /// zero, or if the request does not fit in the remaining space.
    pub fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let base = self.buffer.as_ptr().as_ptr() as usize;
        let capacity = self.buffer.len();
        let mut current = self.cursor.load(Ordering::Acquire);

        loop {
            let Some((offset, next)) = bump(base, current, capacity, size, align) else {
                tracing::trace!(size, align, used = current, capacity, "fixed arena rejected allocation");
                return None;
            };

            match self
                .cursor
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // SAFETY: offset + size <= capacity, checked by `bump`.
                    let ptr = unsafe { self.buffer.as_ptr().as_ptr().add(offset) };
                    return NonNull::new(ptr);
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Moves `value` into the arena, returning a reference to it.
    ///
    /// The value is never dropped: the arena does not track what it holds.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_value<T>(&self, value: T) -> Option<&mut T> {
        let size = std::mem::size_of::<T>().max(1);
        let ptr = self.allocate(size, std::mem::align_of::<T>())?.cast::<T>();
        // SAFETY: the region is fresh, aligned for T and exclusively ours
        // until `reset`, which needs `&mut self`.
        unsafe {
            ptr.as_ptr().write(value);
            Some(&mut *ptr.as_ptr())
        }
    }

    /// Resets the arena, invalidating all previous allocations.
    ///
    /// Requires `&mut self`, so no reference handed out by
    /// [`alloc_value`](Self::alloc_value) can still be alive.
    #[inline]
    pub fn reset(&mut self) {
        *self.cursor.get_mut() = 0;
    }

    /// Gives up the buffer without freeing it.
    ///
    /// Ownership of the memory moves to the caller, e.g. when a finished
    /// table is handed to another owner.
    #[must_use]
    pub fn forget(self) -> AlignedBuffer {
        self.buffer
    }
}

impl std::fmt::Debug for FixedArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_allocation() {
        let arena = FixedArena::new(1024).unwrap();
        let p = arena.allocate(40, 8).unwrap();
        assert_eq!(p.as_ptr() as usize % 8, 0);
        assert_eq!(arena.used(), 40);
    }

    #[test]
    fn test_arena_reset() {
        let mut arena = FixedArena::new(1024).unwrap();
        let _ = arena.allocate(10, 4).unwrap();
        assert!(arena.used() > 0);

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.remaining(), 1024);
    }

    #[test]
    fn test_invalid_alignment_is_rejected() {
        let arena = FixedArena::new(1024).unwrap();
        for align in [0, 3, 6, 12] {
            assert!(arena.allocate(8, align).is_none(), "align {align}");
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let arena = FixedArena::new(64).unwrap();
        assert!(arena.allocate(0, 8).is_none());
        assert!(arena.allocate(65, 1).is_none());
        assert!(arena.allocate(64, 1).is_some());
        assert!(arena.allocate(1, 1).is_none());
    }

    #[test]
    fn test_sequential_allocations_do_not_overlap() {
        let arena = FixedArena::new(256).unwrap();
        let a = arena.allocate(13, 1).unwrap().as_ptr() as usize;
        let b = arena.allocate(32, 32).unwrap().as_ptr() as usize;
        assert!(a + 13 <= b);
        assert_eq!(b % 32, 0);
    }

    #[test]
    fn test_alloc_value() {
        let arena = FixedArena::new(64).unwrap();
        let v = arena.alloc_value(0xDEAD_BEEF_u64).unwrap();
        *v += 1;
        assert_eq!(*v, 0xDEAD_BEF0);
    }

    #[test]
    fn test_forget_keeps_buffer_alive() {
        let arena = FixedArena::new(128).unwrap();
        let p = arena.allocate(8, 8).unwrap();
        // SAFETY: p is valid for 8 bytes inside the arena.
        unsafe { p.cast::<u64>().as_ptr().write(7) };

        let buffer = arena.forget();
        assert!(buffer.contains(p, 8));
        // SAFETY: the buffer now owns the memory that still holds the value.
        assert_eq!(unsafe { p.cast::<u64>().as_ptr().read() }, 7);
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 64;
        const SIZE: usize = 32;

        let arena = FixedArena::new(THREADS * PER_THREAD * SIZE).unwrap();
        let mut regions: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..PER_THREAD)
                            .map(|_| arena.allocate(SIZE, 8).unwrap().as_ptr() as usize)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(arena.used(), THREADS * PER_THREAD * SIZE);
        regions.sort_unstable();
        for pair in regions.windows(2) {
            assert!(pair[0] + SIZE <= pair[1]);
        }
    }
}
