//! ## minne-core::alloc::typed_pool
//! **Typed fixed-capacity pool with stable handles**
//!
//! Slots are a tagged union: a free slot stores the index of the next free
//! slot, an occupied slot owns its value. The discriminant, not pointer
//! casting, decides which is which, so double frees and stale handles are
//! caught in every build.
//!
//! The slot array is one block taken from the pool's allocator at
//! construction, so a pool built over a zoned allocator is charged to the zone
//! current at that moment, and released to it when the pool is dropped.
//!
//! Like [`RawPool`](crate::alloc::pool::RawPool), this is not thread-safe. Use
//! one pool per thread or wrap it in a mutex.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::alloc::pool::PoolExhausted;
use crate::alloc::Allocator;
use crate::diagnostics::{fatal, Violation};
use crate::error::AllocError;

enum Slot<T> {
    Free { next: Option<usize> },
    Occupied(T),
}

/// Handle to a value stored in a [`Pool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle {
    index: usize,
}

impl PoolHandle {
    /// Slot position, stable for the lifetime of the value.
    #[inline]
    pub const fn index(self) -> usize {
        self.index
    }
}

type OomHandler = Box<dyn FnMut(&PoolExhausted) + Send>;

pub struct Pool<T> {
    allocator: Arc<dyn Allocator>,
    slots: NonNull<Slot<T>>,
    capacity: usize,
    align: usize,
    free_head: Option<usize>,
    free_count: usize,
    label: String,
    oom_handler: OomHandler,
    _owns: PhantomData<T>,
}

// SAFETY: the pool exclusively owns its slot array and the values in it.
unsafe impl<T: Send> Send for Pool<T> {}

impl<T> Pool<T> {
    /// Takes room for `capacity` slots from `allocator`, with every slot free
    /// and chained in ascending order.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(allocator: Arc<dyn Allocator>, capacity: usize) -> Result<Self, AllocError> {
        Self::new_aligned(allocator, capacity, 1)
    }

    /// Like [`new`](Self::new), with the slot array aligned to at least
    /// `min_align`, for allocators that refuse smaller alignments.
    pub fn new_aligned(
        allocator: Arc<dyn Allocator>,
        capacity: usize,
        min_align: usize,
    ) -> Result<Self, AllocError> {
        assert!(capacity > 0, "Capacity must be greater than zero");

        let align = align_of::<Slot<T>>().max(min_align);
        let bytes = size_of::<Slot<T>>()
            .checked_mul(capacity)
            .ok_or(AllocError::OutOfMemory {
                size: usize::MAX,
                align,
            })?;
        let slots = allocator.allocate(bytes, align)?.cast::<Slot<T>>();

        for index in 0..capacity {
            let next = (index + 1 < capacity).then_some(index + 1);
            // SAFETY: `index < capacity`, inside the block just allocated.
            unsafe { slots.as_ptr().add(index).write(Slot::Free { next }) };
        }

        debug!(capacity, bytes, "Typed pool created");
        Ok(Self {
            allocator,
            slots,
            capacity,
            align,
            free_head: Some(0),
            free_count: capacity,
            label: String::from("pool"),
            oom_handler: Box::new(|info| {
                warn!(pool = %info.label, capacity = info.capacity, "Pool exhausted");
            }),
            _owns: PhantomData,
        })
    }

    /// Bytes taken from the allocator for the slot array.
    #[inline]
    pub fn reserved_bytes(&self) -> usize {
        self.capacity * size_of::<Slot<T>>()
    }

    fn slots(&self) -> &[Slot<T>] {
        // SAFETY: all `capacity` slots were initialised in `new_aligned`.
        unsafe { slice::from_raw_parts(self.slots.as_ptr(), self.capacity) }
    }

    fn slots_mut(&mut self) -> &mut [Slot<T>] {
        // SAFETY: as in `slots`, and `&mut self` makes the access exclusive.
        unsafe { slice::from_raw_parts_mut(self.slots.as_ptr(), self.capacity) }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn set_oom_handler(&mut self, handler: impl FnMut(&PoolExhausted) + Send + 'static) {
        self.oom_handler = Box::new(handler);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.capacity() - self.free_count
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Stores `value` in the most recently freed slot.
    ///
    /// When the pool is full the out-of-memory handler runs and `value` is
    /// handed back.
    pub fn allocate(&mut self, value: T) -> Result<PoolHandle, T> {
        let Some(index) = self.free_head else {
            let info = PoolExhausted {
                label: self.label.clone(),
                capacity: self.capacity(),
                slot_size: std::mem::size_of::<Slot<T>>(),
            };
            (self.oom_handler)(&info);
            return Err(value);
        };

        let next = match self.slots()[index] {
            Slot::Free { next } => next,
            Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
        };
        self.slots_mut()[index] = Slot::Occupied(value);
        self.free_head = next;
        self.free_count -= 1;

        Ok(PoolHandle { index })
    }

    /// Takes the value out of its slot and returns the slot to the free list.
    ///
    /// Freeing a slot that is not occupied is a contract violation.
    pub fn free(&mut self, handle: PoolHandle) -> T {
        let index = self.checked(handle.index);
        let next = self.free_head;
        let slot = std::mem::replace(&mut self.slots_mut()[index], Slot::Free { next });
        match slot {
            Slot::Occupied(value) => {
                self.free_head = Some(index);
                self.free_count += 1;
                value
            }
            free @ Slot::Free { .. } => {
                self.slots_mut()[index] = free;
                fatal(Violation::PoolDoubleFree {
                    pool: self.label.clone(),
                    index,
                })
            }
        }
    }

    #[inline]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        match self.slots().get(handle.index)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        match self.slots_mut().get_mut(handle.index)? {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    /// Slot index behind `handle`.
    #[inline]
    pub fn index_of(&self, handle: PoolHandle) -> usize {
        self.checked(handle.index)
    }

    /// Handle for the occupied slot at `index`, if any.
    pub fn handle_at(&self, index: usize) -> Option<PoolHandle> {
        let index = self.checked(index);
        matches!(self.slots()[index], Slot::Occupied(_)).then_some(PoolHandle { index })
    }

    /// Visits live values in ascending slot order.
    pub fn for_each(&self, mut visit: impl FnMut(PoolHandle, &T)) {
        for (handle, value) in self.iter() {
            visit(handle, value);
        }
    }

    /// Visits live values mutably in ascending slot order.
    pub fn for_each_mut(&mut self, mut visit: impl FnMut(PoolHandle, &mut T)) {
        for (index, slot) in self.slots_mut().iter_mut().enumerate() {
            if let Slot::Occupied(value) = slot {
                visit(PoolHandle { index }, value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(value) => Some((PoolHandle { index }, value)),
                Slot::Free { .. } => None,
            })
    }

    fn checked(&self, index: usize) -> usize {
        if index >= self.capacity() {
            fatal(Violation::PoolIndexOutOfRange {
                pool: self.label.clone(),
                index,
                capacity: self.capacity(),
            });
        }
        index
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        let bytes = self.reserved_bytes();
        // SAFETY: every slot is initialised; live values are dropped before
        // the block goes back to the allocator it came from with its layout.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.slots.as_ptr(), self.capacity));
            self.allocator.free(self.slots.as_ptr().cast::<u8>(), bytes, self.align);
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.label)
            .field("capacity", &self.capacity())
            .field("free_count", &self.free_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::system::SystemAllocator;
    use crate::context::MemoryContext;
    use crate::zone::{ScopedZone, ZoneBudget, DEFAULT_ZONE};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn system() -> Arc<dyn Allocator> {
        Arc::new(SystemAllocator::new())
    }

    #[test]
    fn allocate_free_roundtrip() {
        let mut pool: Pool<u32> = Pool::new(system(), 10).unwrap();

        let handle = pool.allocate(42).unwrap();
        assert_eq!(*pool.get(handle).unwrap(), 42);
        assert_eq!(pool.live_count(), 1);

        assert_eq!(pool.free(handle), 42);
        assert_eq!(pool.live_count(), 0);
        assert!(pool.get(handle).is_none());
    }

    #[test]
    fn full_pool_returns_value_and_calls_handler() {
        let mut pool: Pool<[u8; 16]> = Pool::new(system(), 4).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        pool.set_oom_handler(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let handles: Vec<_> = (0..4).map(|i| pool.allocate([i; 16]).unwrap()).collect();
        assert!(pool.is_full());
        assert_eq!(pool.allocate([9; 16]), Err([9; 16]));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        pool.free(handles[2]);
        let reused = pool.allocate([7; 16]).unwrap();
        assert_eq!(reused, handles[2]);
    }

    #[test]
    fn index_translation_round_trips() {
        let mut pool: Pool<u64> = Pool::new(system(), 8).unwrap();
        for i in 0..8 {
            let handle = pool.allocate(i).unwrap();
            assert_eq!(pool.handle_at(pool.index_of(handle)), Some(handle));
        }
        let freed = pool.handle_at(3).unwrap();
        pool.free(freed);
        assert_eq!(pool.handle_at(3), None);
    }

    #[test]
    fn iteration_is_ascending_and_skips_free() {
        let mut pool: Pool<u32> = Pool::new(system(), 5).unwrap();
        let handles: Vec<_> = (0..5).map(|i| pool.allocate(i * 10).unwrap()).collect();
        pool.free(handles[0]);
        pool.free(handles[3]);

        let seen: Vec<_> = pool.iter().map(|(h, v)| (h.index(), *v)).collect();
        assert_eq!(seen, vec![(1, 10), (2, 20), (4, 40)]);

        pool.for_each_mut(|_, value| *value += 1);
        let mut visited = Vec::new();
        pool.for_each(|_, value| visited.push(*value));
        assert_eq!(visited, vec![11, 21, 41]);
    }

    #[test]
    fn drop_releases_live_values() {
        let tracker = Rc::new(());
        {
            let mut pool: Pool<Rc<()>> = Pool::new(system(), 3).unwrap();
            pool.allocate(tracker.clone()).unwrap();
            pool.allocate(tracker.clone()).unwrap();
            assert_eq!(Rc::strong_count(&tracker), 3);
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn double_free_is_fatal() {
        let mut pool: Pool<u32> = Pool::new(system(), 2).unwrap();
        let handle = pool.allocate(1).unwrap();
        pool.free(handle);
        pool.free(handle);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn handle_beyond_capacity_is_fatal() {
        let pool: Pool<u32> = Pool::new(system(), 2).unwrap();
        pool.handle_at(2);
    }

    #[test]
    fn slot_array_is_charged_to_current_zone() {
        let context = MemoryContext::new(4);
        context.register_zone("default", DEFAULT_ZONE, ZoneBudget::UNLIMITED);
        context.register_zone("entities", 1, ZoneBudget::UNLIMITED);
        context.install_zoned_allocator();

        let _scope = ScopedZone::enter(1);
        let mut pool: Pool<[u64; 8]> = Pool::new(context.allocator(), 1024).unwrap();
        let counters = context.registry().zone(1).counters();
        assert_eq!(pool.reserved_bytes(), 1024 * size_of::<Slot<[u64; 8]>>());
        assert_eq!(counters.live_bytes(), pool.reserved_bytes());
        assert_eq!(counters.live_count(), 1);

        let handle = pool.allocate([3; 8]).unwrap();
        assert_eq!(pool.free(handle), [3; 8]);
        assert_eq!(counters.total_allocations(), 1);

        drop(pool);
        assert_eq!(counters.live_bytes(), 0);
        assert_eq!(counters.total_frees(), 1);
    }

    #[test]
    fn min_align_is_honoured_for_slot_array() {
        let allocator: Arc<dyn Allocator> = Arc::new(SystemAllocator::with_min_align(64));
        assert!(Pool::<u32>::new(allocator.clone(), 4).is_err());

        let mut pool: Pool<u32> = Pool::new_aligned(allocator, 4, 64).unwrap();
        let handle = pool.allocate(11).unwrap();
        assert_eq!(pool.get(handle), Some(&11));
    }
}
