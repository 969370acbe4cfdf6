//! ## minne-core::alloc::pool
//! **Fixed-size slot pool with an intrusive free list**
//!
//! One buffer of `capacity * slot_size` bytes is taken from the backing
//! allocator at construction (usually a zoned allocator, so the whole pool is
//! charged to one zone). After that, allocate and free are pointer arithmetic:
//! a free slot's first word holds the address of the next free slot.
//!
//! The pool has no internal synchronization. Use one pool per thread or wrap
//! it in a lock.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::alloc::{align_up, Allocator};
use crate::diagnostics::{fatal, Violation};
use crate::error::AllocError;

/// Free-list link stored in the first word of every free slot.
type Link = Option<NonNull<u8>>;

/// Passed to the out-of-memory handler when a pool runs dry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolExhausted {
    pub label: String,
    pub capacity: usize,
    pub slot_size: usize,
}

type OomHandler = Box<dyn FnMut(&PoolExhausted) + Send>;

fn log_exhaustion(info: &PoolExhausted) {
    warn!(
        pool = %info.label,
        capacity = info.capacity,
        slot_size = info.slot_size,
        "Pool exhausted"
    );
}

pub struct RawPool {
    allocator: Arc<dyn Allocator>,
    base: NonNull<u8>,
    slot_size: usize,
    slot_align: usize,
    capacity: usize,
    free_head: Link,
    free_count: usize,
    zero_on_alloc: bool,
    label: String,
    oom_handler: OomHandler,
}

// SAFETY: the pool exclusively owns its buffer; every access goes through
// `&mut self` or reads free-list links through `&self`.
unsafe impl Send for RawPool {}

impl RawPool {
    /// Reserves `capacity` slots able to hold values of `layout` and chains
    /// them all into the free list in ascending address order.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(
        allocator: Arc<dyn Allocator>,
        capacity: usize,
        layout: Layout,
    ) -> Result<Self, AllocError> {
        assert!(capacity > 0, "Capacity must be greater than zero");

        let slot_align = layout.align().max(align_of::<Link>());
        let slot_size = align_up(layout.size().max(size_of::<Link>()), slot_align);
        let bytes = slot_size
            .checked_mul(capacity)
            .ok_or(AllocError::OutOfMemory {
                size: usize::MAX,
                align: slot_align,
            })?;
        let base = allocator.allocate(bytes, slot_align)?;

        let mut pool = Self {
            allocator,
            base,
            slot_size,
            slot_align,
            capacity,
            free_head: None,
            free_count: 0,
            zero_on_alloc: false,
            label: String::from("pool"),
            oom_handler: Box::new(log_exhaustion),
        };
        pool.chain_all_slots();

        debug!(capacity, slot_size, bytes, "Pool created");
        Ok(pool)
    }

    /// Shorthand for a pool sized for `T`.
    pub fn for_type<T>(allocator: Arc<dyn Allocator>, capacity: usize) -> Result<Self, AllocError> {
        Self::new(allocator, capacity, Layout::new::<T>())
    }

    /// Names the pool in diagnostics and exhaustion reports.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Zero each slot before handing it out.
    pub fn set_zero_on_alloc(&mut self, enabled: bool) {
        self.zero_on_alloc = enabled;
    }

    /// Replaces the handler invoked when `allocate` finds no free slot.
    pub fn set_oom_handler(&mut self, handler: impl FnMut(&PoolExhausted) + Send + 'static) {
        self.oom_handler = Box::new(handler);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn live_count(&self) -> usize {
        self.capacity - self.free_count
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Pops a slot off the free list.
    ///
    /// Returns `None` after invoking the out-of-memory handler when the pool
    /// is full.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        let Some(slot) = self.free_head else {
            let info = PoolExhausted {
                label: self.label.clone(),
                capacity: self.capacity,
                slot_size: self.slot_size,
            };
            (self.oom_handler)(&info);
            return None;
        };

        // SAFETY: `slot` is on the free list, so its first word is a link.
        self.free_head = unsafe { read_link(slot) };
        self.free_count -= 1;

        if self.zero_on_alloc {
            // SAFETY: the slot is `slot_size` bytes inside our buffer.
            unsafe { ptr::write_bytes(slot.as_ptr(), 0, self.slot_size) };
        }
        Some(slot)
    }

    /// Pushes a slot back onto the free list.
    ///
    /// Pointers outside the buffer or off a slot boundary are reported as
    /// contract violations in every build. Freeing into a full pool is always
    /// caught as a double free; debug builds also scan the free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`RawPool::allocate`] on this pool and
    /// not freed since. The caller must not touch the slot afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let index = self.checked_index(ptr);
        if self.free_count == self.capacity {
            fatal(self.double_free(index));
        }
        #[cfg(debug_assertions)]
        if self.free_slots().any(|slot| slot == ptr) {
            fatal(self.double_free(index));
        }

        write_link(ptr, self.free_head);
        self.free_head = Some(ptr);
        self.free_count += 1;
    }

    /// Whether `ptr` is the start of one of this pool's slots.
    pub fn is_in_pool(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start
            && addr - start < self.capacity * self.slot_size
            && (addr - start) % self.slot_size == 0
    }

    /// Position of the slot at `ptr`.
    pub fn get_index(&self, ptr: NonNull<u8>) -> usize {
        self.checked_index(ptr)
    }

    /// Address of the slot at `index`.
    pub fn get_elem(&self, index: usize) -> NonNull<u8> {
        if index >= self.capacity {
            fatal(Violation::PoolIndexOutOfRange {
                pool: self.label.clone(),
                index,
                capacity: self.capacity,
            });
        }
        self.slot_ptr(index)
    }

    /// Addresses reachable from the free-list head, in list order.
    pub fn free_slots(&self) -> FreeSlots<'_> {
        FreeSlots {
            next: self.free_head,
            remaining: self.free_count,
            _pool: PhantomData,
        }
    }

    /// Visits every live slot in ascending address order.
    ///
    /// The free list is first collected and sorted, then consumed in step with
    /// the slot walk, so each call costs `O(capacity + free log free)`.
    pub fn for_each(&self, mut visit: impl FnMut(NonNull<u8>)) {
        let mut free: Vec<usize> = self
            .free_slots()
            .map(|slot| slot.as_ptr() as usize)
            .collect();
        free.sort_unstable();

        let mut skip = free.into_iter().peekable();
        for index in 0..self.capacity {
            let slot = self.slot_ptr(index);
            if skip.peek() == Some(&(slot.as_ptr() as usize)) {
                skip.next();
                continue;
            }
            visit(slot);
        }
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity keeps the offset inside the buffer.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.slot_size)) }
    }

    fn chain_all_slots(&mut self) {
        for index in 0..self.capacity {
            let next = (index + 1 < self.capacity).then(|| self.slot_ptr(index + 1));
            // SAFETY: every slot is at least one link wide and link-aligned.
            unsafe { write_link(self.slot_ptr(index), next) };
        }
        self.free_head = Some(self.slot_ptr(0));
        self.free_count = self.capacity;
    }

    fn checked_index(&self, ptr: NonNull<u8>) -> usize {
        let start = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < start || addr - start >= self.capacity * self.slot_size {
            fatal(Violation::PoolPointerOutOfBounds {
                pool: self.label.clone(),
                addr,
            });
        }
        if (addr - start) % self.slot_size != 0 {
            fatal(Violation::PoolPointerMisaligned {
                pool: self.label.clone(),
                addr,
            });
        }
        (addr - start) / self.slot_size
    }

    fn double_free(&self, index: usize) -> Violation {
        Violation::PoolDoubleFree {
            pool: self.label.clone(),
            index,
        }
    }
}

impl Drop for RawPool {
    fn drop(&mut self) {
        if self.free_count != self.capacity {
            debug!(
                pool = %self.label,
                live = self.live_count(),
                "Dropping pool with live slots"
            );
        }
        // SAFETY: the buffer came from this allocator with this layout.
        unsafe {
            self.allocator.free(
                self.base.as_ptr(),
                self.capacity * self.slot_size,
                self.slot_align,
            )
        };
    }
}

impl fmt::Debug for RawPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPool")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("free_count", &self.free_count)
            .finish_non_exhaustive()
    }
}

/// Iterator over the free list, see [`RawPool::free_slots`].
pub struct FreeSlots<'pool> {
    next: Link,
    remaining: usize,
    _pool: PhantomData<&'pool RawPool>,
}

impl Iterator for FreeSlots<'_> {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.next?;
        self.remaining -= 1;
        // SAFETY: the pool is borrowed, so the list cannot change under us.
        self.next = unsafe { read_link(slot) };
        Some(slot)
    }
}

#[inline]
unsafe fn read_link(slot: NonNull<u8>) -> Link {
    slot.as_ptr().cast::<Link>().read()
}

#[inline]
unsafe fn write_link(slot: NonNull<u8>, next: Link) {
    slot.as_ptr().cast::<Link>().write(next)
}
