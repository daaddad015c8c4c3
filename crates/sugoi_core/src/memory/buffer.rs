//! # Aligned Buffer
//!
//! Owned, zero-initialized heap memory with an explicit alignment.

// SAFETY: This module wraps the raw global allocator.
#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::MemoryError;

/// A heap buffer with a caller-chosen alignment.
///
/// The memory is zeroed on creation and freed on drop. A zero-sized buffer
/// performs no allocation and hands out a dangling, well-aligned pointer.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocates `size` zeroed bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidLayout`] if `align` is not a power of two or the
    /// rounded size overflows, [`MemoryError::OutOfMemory`] if the system
    /// allocator fails.
    pub fn new(size: usize, align: usize) -> Result<Self, MemoryError> {
        let layout =
            Layout::from_size_align(size, align).map_err(|_| MemoryError::InvalidLayout { size, align })?;

        if size == 0 {
            // Dangling but aligned: `align` is a non-zero power of two here.
            let ptr = NonNull::new(align as *mut u8).ok_or(MemoryError::InvalidLayout { size, align })?;
            return Ok(Self { ptr, layout });
        }

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(MemoryError::OutOfMemory { size })?;
        Ok(Self { ptr, layout })
    }

    /// Start of the buffer.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    /// Checks if the buffer holds no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment of the start address.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    /// Checks whether `[ptr, ptr + size)` lies inside this buffer.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let start = self.ptr.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= start
            && addr
                .checked_add(size)
                .is_some_and(|end| end <= start + self.layout.size())
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            // SAFETY: allocated in `new` with this exact layout.
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

// SAFETY: the buffer exclusively owns its allocation; no interior aliasing.
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only exposes the pointer value and sizes.
unsafe impl Sync for AlignedBuffer {}
