//! # Struct Arena
//!
//! Two-phase arena for a fixed set of members known up front.
//!
//! ```text
//! record(a) ─┐
//! record(b) ─┼─> initialize() ─> allocate(a), allocate(b), ...
//! record(c) ─┘     (one heap call)
//! ```
//!
//! The recording phase computes the exact capacity and the offset of every
//! member. `initialize` allocates the buffer once, aligned to the largest
//! recorded alignment, so replaying the same requests in the same order
//! yields exactly the recorded offsets.

// SAFETY: Hands out raw regions of an owned buffer.
#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::buffer::AlignedBuffer;
use super::bump;
use crate::error::MemoryError;

/// A record-then-initialize bump arena.
///
/// # Thread Safety
///
/// NOT thread-safe; every operation takes `&mut self`.
#[derive(Debug)]
pub struct StructArena {
    /// Backing buffer, present once initialized.
    buffer: Option<AlignedBuffer>,
    /// Bytes recorded (before init) or allocated (after init).
    cursor: usize,
    /// Total bytes recorded; fixed after init.
    capacity: usize,
    /// Largest alignment recorded.
    max_align: usize,
}

impl StructArena {
    /// Creates an empty arena in the recording phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: None,
            cursor: 0,
            capacity: 0,
            max_align: 1,
        }
    }

    /// Records a member of `size` bytes aligned to `align`.
    ///
    /// Returns the member's offset from the start of the buffer, or `None`
    /// for invalid parameters or once the arena is initialized.
    pub fn record(&mut self, size: usize, align: usize) -> Option<usize> {
        if self.buffer.is_some() {
            tracing::warn!(size, align, "struct arena: record after initialize");
            return None;
        }
        // Offsets are relative to a base aligned to `max_align`, so a zero
        // base reproduces the real placement.
        let (offset, next) = bump(0, self.capacity, usize::MAX, size, align)?;
        self.capacity = next;
        self.max_align = self.max_align.max(align);
        Some(offset)
    }

    /// Records an array of `count` values of `T`.
    pub fn record_array<T>(&mut self, count: usize) -> Option<usize> {
        let size = std::mem::size_of::<T>().checked_mul(count)?;
        self.record(size, std::mem::align_of::<T>())
    }

    /// Allocates the backing buffer for everything recorded so far.
    ///
    /// # Errors
    ///
    /// [`MemoryError::AlreadyInitialized`] on a second call, or any buffer
    /// allocation failure.
    pub fn initialize(&mut self) -> Result<(), MemoryError> {
        if self.buffer.is_some() {
            return Err(MemoryError::AlreadyInitialized);
        }
        self.buffer = Some(AlignedBuffer::new(self.capacity, self.max_align)?);
        self.cursor = 0;
        Ok(())
    }

    /// Checks whether [`initialize`](Self::initialize) has run.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.buffer.is_some()
    }

    /// Total bytes recorded.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest alignment recorded.
    #[inline]
    #[must_use]
    pub fn max_align(&self) -> usize {
        self.max_align
    }

    /// Bytes allocated since initialization.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        if self.buffer.is_some() {
            self.cursor
        } else {
            0
        }
    }

    /// Allocates `size` bytes aligned to `align` from the initialized buffer.
    ///
    /// Returns `None` before `initialize`, for invalid parameters, or when the
    /// recorded capacity is exhausted. The arena never grows.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let Some(buffer) = &self.buffer else {
            tracing::warn!(size, align, "struct arena: allocate before initialize");
            return None;
        };
        let base = buffer.as_ptr().as_ptr() as usize;
        let (offset, next) = bump(base, self.cursor, buffer.len(), size, align)?;
        self.cursor = next;
        // SAFETY: offset + size <= buffer.len(), checked by `bump`.
        NonNull::new(unsafe { buffer.as_ptr().as_ptr().add(offset) })
    }

    /// Allocates an array of `count` values of `T`.
    pub fn allocate_array<T>(&mut self, count: usize) -> Option<NonNull<T>> {
        let size = std::mem::size_of::<T>().checked_mul(count)?;
        self.allocate(size, std::mem::align_of::<T>()).map(NonNull::cast)
    }

    /// Gives up the buffer without freeing it.
    ///
    /// Returns `None` if the arena was never initialized.
    #[must_use]
    pub fn forget(self) -> Option<AlignedBuffer> {
        self.buffer
    }
}

impl Default for StructArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_computes_offsets() {
        let mut arena = StructArena::new();
        assert_eq!(arena.record(3, 1), Some(0));
        assert_eq!(arena.record(8, 8), Some(8));
        assert_eq!(arena.record_array::<u16>(3), Some(16));
        assert_eq!(arena.capacity(), 22);
        assert_eq!(arena.max_align(), 8);
    }

    #[test]
    fn test_record_rejects_invalid() {
        let mut arena = StructArena::new();
        assert_eq!(arena.record(8, 0), None);
        assert_eq!(arena.record(8, 3), None);
        assert_eq!(arena.record(0, 8), None);
        assert_eq!(arena.capacity(), 0);
    }

    #[test]
    fn test_allocate_before_initialize() {
        let mut arena = StructArena::new();
        let _ = arena.record(16, 8);
        assert!(arena.allocate(16, 8).is_none());
    }

    #[test]
    fn test_replay_matches_record() {
        let mut arena = StructArena::new();
        let offsets = [
            arena.record(3, 1).unwrap(),
            arena.record_array::<u64>(4).unwrap(),
            arena.record_array::<u32>(5).unwrap(),
        ];
        arena.initialize().unwrap();

        let base = arena.allocate(3, 1).unwrap().as_ptr() as usize;
        let b = arena.allocate_array::<u64>(4).unwrap().as_ptr() as usize;
        let c = arena.allocate_array::<u32>(5).unwrap().as_ptr() as usize;
        assert_eq!(b - base, offsets[1]);
        assert_eq!(c - base, offsets[2]);
        assert_eq!(b % 8, 0);
        assert_eq!(arena.used(), arena.capacity());

        // No growth past what was recorded.
        assert!(arena.allocate(1, 1).is_none());
    }

    #[test]
    fn test_no_record_after_initialize() {
        let mut arena = StructArena::new();
        let _ = arena.record(4, 4);
        arena.initialize().unwrap();
        assert_eq!(arena.record(4, 4), None);
        assert_eq!(arena.initialize(), Err(MemoryError::AlreadyInitialized));
    }

    #[test]
    fn test_forget() {
        let mut arena = StructArena::new();
        assert!(StructArena::new().forget().is_none());
        let _ = arena.record(32, 16);
        arena.initialize().unwrap();
        let p = arena.allocate(32, 16).unwrap();
        let buffer = arena.forget().unwrap();
        assert!(buffer.contains(p, 32));
    }
}
