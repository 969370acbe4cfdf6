//! ## minne-core::context
//! **Registry plus swappable underlying allocator**
//!
//! A [`MemoryContext`] owns one [`ZoneRegistry`] and one
//! [`UnderlyingAllocator`] slot. Components receive the context (or the
//! allocator handle it hands out) instead of reaching for hidden globals, so
//! tests can build as many isolated contexts as they need.
//!
//! [`MemoryContext::global`] exists for code that has no context to thread
//! through. It starts with the system allocator installed and the default zone
//! registered, so allocations issued before any configuration still succeed.

use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::alloc::array::ArrayAllocExt;
use crate::alloc::underlying::UnderlyingAllocator;
use crate::alloc::Allocator;
use crate::error::AllocError;
use crate::zone::registry::{Zone, ZoneBudget, ZoneId, ZoneRegistry, DEFAULT_ZONE};
use crate::zone::zoned::ZonedAllocator;

static GLOBAL: Lazy<MemoryContext> = Lazy::new(|| {
    let context = MemoryContext::new(ZoneRegistry::DEFAULT_CAPACITY);
    context.register_zone("default", DEFAULT_ZONE, ZoneBudget::UNLIMITED);
    context
});

#[derive(Debug, Clone)]
pub struct MemoryContext {
    registry: Arc<ZoneRegistry>,
    underlying: Arc<UnderlyingAllocator>,
    zoned: Arc<Mutex<Option<Arc<ZonedAllocator>>>>,
}

impl MemoryContext {
    /// Isolated context with an empty registry of `registry_capacity` slots
    /// and the system allocator installed.
    pub fn new(registry_capacity: usize) -> Self {
        Self {
            registry: Arc::new(ZoneRegistry::new(registry_capacity)),
            underlying: Arc::new(UnderlyingAllocator::new()),
            zoned: Arc::new(Mutex::new(None)),
        }
    }

    /// Process-wide context.
    pub fn global() -> &'static MemoryContext {
        &GLOBAL
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    pub fn register_zone(&self, name: &str, id: ZoneId, budget: ZoneBudget) -> &Zone {
        self.registry.register(name, id, budget)
    }

    /// Installs `allocator` and returns the one it replaced.
    pub fn set_underlying_allocator(&self, allocator: Arc<dyn Allocator>) -> Arc<dyn Allocator> {
        self.underlying.set(allocator)
    }

    /// Allocator currently installed in the slot.
    pub fn underlying_allocator(&self) -> Arc<dyn Allocator> {
        self.underlying.get()
    }

    /// Handle that always forwards to whatever allocator is installed at call
    /// time. Hand this to pools and other long-lived consumers.
    pub fn allocator(&self) -> Arc<dyn Allocator> {
        self.underlying.clone()
    }

    /// Wraps the installed allocator in a [`ZonedAllocator`] bound to this
    /// context's registry and installs the result.
    ///
    /// If the zoned allocator this context installed is still the one in the
    /// slot, it is returned as is, so requests are never charged twice.
    ///
    /// Memory obtained before the switch must be released before it, or with
    /// the previous allocator directly, since it was never charged to a zone.
    pub fn install_zoned_allocator(&self) -> Arc<ZonedAllocator> {
        let mut installed = self.zoned.lock();
        let current = self.underlying.get();
        if let Some(zoned) = installed.as_ref() {
            if Arc::as_ptr(&current) as *const () == Arc::as_ptr(zoned) as *const () {
                debug!("Zoned allocator already installed");
                return Arc::clone(zoned);
            }
        }

        let zoned = Arc::new(ZonedAllocator::new(Arc::clone(&self.registry), current));
        self.underlying.set(zoned.clone());
        *installed = Some(zoned.clone());
        info!(zones = self.registry.len(), "Zoned allocator installed");
        zoned
    }

    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.underlying.allocate(size, align)
    }

    /// # Safety
    ///
    /// Same contract as [`Allocator::free`].
    pub unsafe fn free(&self, ptr: *mut u8, size: usize, align: usize) {
        self.underlying.free(ptr, size, align)
    }

    pub fn allocate_array(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.underlying.allocate_array(size, align)
    }

    /// # Safety
    ///
    /// Same contract as [`ArrayAllocExt::free_array`].
    pub unsafe fn free_array(&self, ptr: *mut u8) {
        self.underlying.free_array(ptr)
    }
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new(ZoneRegistry::DEFAULT_CAPACITY)
    }
}

/// Registers a zone in the global context.
pub fn register_zone(name: &str, id: ZoneId, budget: ZoneBudget) -> &'static Zone {
    MemoryContext::global().register_zone(name, id, budget)
}

/// Swaps the global context's underlying allocator, returning the previous one.
pub fn set_underlying_allocator(allocator: Arc<dyn Allocator>) -> Arc<dyn Allocator> {
    MemoryContext::global().set_underlying_allocator(allocator)
}
