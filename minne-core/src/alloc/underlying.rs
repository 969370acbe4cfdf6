//! ## minne-core::alloc::underlying
//! **Swappable allocator slot**
//!
//! Holds whichever allocator the process decided to run on (plain system
//! heap, zoned, or something a test injected). It starts out as a
//! [`SystemAllocator`] so that requests issued before startup configuration
//! still succeed.
//!
//! Swap only during startup: memory must be freed through the allocator that
//! produced it, and the slot does not remember which one that was.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::alloc::system::SystemAllocator;
use crate::alloc::Allocator;
use crate::error::AllocError;

pub struct UnderlyingAllocator {
    current: RwLock<Arc<dyn Allocator>>,
}

impl UnderlyingAllocator {
    /// Creates a slot holding the system allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(SystemAllocator::new()))
    }

    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            current: RwLock::new(allocator),
        }
    }

    /// Returns the allocator currently installed.
    pub fn get(&self) -> Arc<dyn Allocator> {
        Arc::clone(&*self.current.read())
    }

    /// Installs `allocator` and returns the one it replaces.
    pub fn set(&self, allocator: Arc<dyn Allocator>) -> Arc<dyn Allocator> {
        debug!("Swapping underlying allocator");
        std::mem::replace(&mut *self.current.write(), allocator)
    }
}

impl Default for UnderlyingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnderlyingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnderlyingAllocator").finish_non_exhaustive()
    }
}

impl Allocator for UnderlyingAllocator {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.current.read().allocate(size, align)
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8, size: usize, align: usize) {
        self.current.read().free(ptr, size, align)
    }
}
