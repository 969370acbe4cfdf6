//! ## minne-core::alloc::system
//! **System heap backing allocator**
//!
//! The leaf of every allocator stack. Always available, so it is what the
//! underlying allocator slot starts with before any configuration runs.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::alloc::{check_align, Allocator};
use crate::error::AllocError;

/// Pass-through allocator over the Rust system heap.
#[derive(Debug, Clone, Copy)]
pub struct SystemAllocator {
    min_align: usize,
}

impl SystemAllocator {
    /// Creates an allocator accepting any power-of-two alignment.
    pub const fn new() -> Self {
        Self { min_align: 1 }
    }

    /// Creates an allocator that rejects alignments below `min_align`.
    ///
    /// # Panics
    ///
    /// If `min_align` is not a power of two.
    pub fn with_min_align(min_align: usize) -> Self {
        assert!(
            min_align.is_power_of_two(),
            "Minimum alignment must be a power of two"
        );
        Self { min_align }
    }

    /// Returns the smallest alignment this allocator accepts.
    pub fn min_align(&self) -> usize {
        self.min_align
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        check_align(align, self.min_align)?;
        // Zero-size requests still get a unique pointer.
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|_| AllocError::OutOfMemory { size, align })?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size, align })
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize, align: usize) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: the caller guarantees (size, align) match the allocation,
        // which already passed Layout validation.
        let layout = Layout::from_size_align_unchecked(size.max(1), align);
        std::alloc::dealloc(ptr, layout);
    }
}
