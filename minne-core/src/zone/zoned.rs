//! ## minne-core::zone::zoned
//! **Allocator that charges every request to the caller's current zone**
//!
//! `free` is charged to whatever zone is current at free time. Callers keep
//! allocation and release inside the same [`ScopedZone`](super::ScopedZone)
//! (or otherwise ensure the same zone is current) so the two match up.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::alloc::Allocator;
use crate::error::AllocError;
use crate::zone::context::current_zone;
use crate::zone::registry::ZoneRegistry;

pub struct ZonedAllocator {
    registry: Arc<ZoneRegistry>,
    backing: Arc<dyn Allocator>,
}

impl ZonedAllocator {
    pub fn new(registry: Arc<ZoneRegistry>, backing: Arc<dyn Allocator>) -> Self {
        Self { registry, backing }
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    pub fn backing(&self) -> &Arc<dyn Allocator> {
        &self.backing
    }
}

impl fmt::Debug for ZonedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZonedAllocator")
            .field("zones", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Allocator for ZonedAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let zone = self.registry.zone(current_zone());
        let reservation = zone
            .reserve(size)
            .ok_or(AllocError::OutOfMemory { size, align })?;
        match self.backing.allocate(size, align) {
            Ok(ptr) => {
                zone.commit(reservation);
                Ok(ptr)
            }
            Err(err) => {
                zone.cancel(reservation);
                Err(err)
            }
        }
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize, align: usize) {
        if ptr.is_null() {
            return;
        }
        self.backing.free(ptr, size, align);
        self.registry.zone(current_zone()).track_free(size);
    }
}
