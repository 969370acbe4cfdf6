//! ## minne-core::alloc::array
//! **Self-describing array allocations**
//!
//! Variable-length allocations get an 8-byte header written just before the
//! pointer handed to the caller:
//!
//! ```text
//!  base                               ptr
//!   |<------ physical_align ------->|<------------ size ------------>|
//!   [ padding ...     | header (8B) ][ caller data ...                ]
//! ```
//!
//! The header packs the total physical size (upper 58 bits) and `log2` of the
//! physical alignment (lower 6 bits), so `free_array` can hand the backing
//! allocator exactly the layout it produced.

use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use crate::alloc::{check_align, Allocator};
use crate::diagnostics::{fatal, Violation};
use crate::error::AllocError;

/// Size of the hidden header, also the smallest physical alignment used.
pub const HEADER_SIZE: usize = size_of::<u64>();

const ALIGN_BITS: u32 = 6;
const ALIGN_MASK: u64 = (1 << ALIGN_BITS) - 1;

/// Largest physical size a header can record.
pub const MAX_ARRAY_BYTES: u64 = (1 << (u64::BITS - ALIGN_BITS)) - 1;

/// Packed `{size: 58, align_log2: 6}` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ArrayHeader(u64);

impl ArrayHeader {
    /// Encodes a physical `size` and power-of-two `align`.
    ///
    /// Returns `None` when `size` does not fit in 58 bits or `align` is not a
    /// power of two.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        if !align.is_power_of_two() || size as u64 > MAX_ARRAY_BYTES {
            return None;
        }
        Some(Self(
            ((size as u64) << ALIGN_BITS) | u64::from(align.trailing_zeros()),
        ))
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Total physical size, header and padding included.
    #[inline]
    pub const fn size(self) -> usize {
        (self.0 >> ALIGN_BITS) as usize
    }

    /// Physical alignment, or 0 if the recorded exponent does not fit `usize`.
    #[inline]
    pub fn align(self) -> usize {
        1usize.checked_shl((self.0 & ALIGN_MASK) as u32).unwrap_or(0)
    }
}

/// Reads the header stored in front of an array pointer.
///
/// # Safety
///
/// `ptr` must have been returned by [`ArrayAllocExt::allocate_array`] and not
/// freed yet.
#[inline]
pub unsafe fn read_array_header(ptr: *const u8) -> ArrayHeader {
    ArrayHeader::from_bits(ptr.sub(HEADER_SIZE).cast::<u64>().read())
}

/// Array allocation on top of any [`Allocator`].
pub trait ArrayAllocExt: Allocator {
    /// Allocates `size` usable bytes aligned to `align`, preceded by a header.
    fn allocate_array(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        check_align(align, 1)?;
        let physical_align = align.max(HEADER_SIZE);
        let oom = AllocError::OutOfMemory { size, align };
        let total = size.checked_add(physical_align).ok_or(oom)?;
        let header = ArrayHeader::new(total, physical_align).ok_or(oom)?;

        let base = self.allocate(total, physical_align)?;
        // SAFETY: the block is `total >= physical_align` bytes long, and
        // `ptr - HEADER_SIZE` is 8-byte aligned because `ptr` is aligned to
        // `physical_align >= HEADER_SIZE`.
        unsafe {
            let ptr = base.as_ptr().add(physical_align);
            ptr.sub(HEADER_SIZE).cast::<u64>().write(header.to_bits());
            Ok(NonNull::new_unchecked(ptr))
        }
    }

    /// Allocates uninitialized storage for `len` values of `T`.
    fn allocate_array_of<T>(&self, len: usize) -> Result<NonNull<T>, AllocError> {
        let size = size_of::<T>()
            .checked_mul(len)
            .ok_or(AllocError::OutOfMemory {
                size: usize::MAX,
                align: align_of::<T>(),
            })?;
        self.allocate_array(size, align_of::<T>()).map(NonNull::cast)
    }

    /// Frees an array using the layout recorded in its header.
    ///
    /// A null `ptr` is ignored. A header whose alignment is below
    /// [`HEADER_SIZE`] cannot have been written by `allocate_array` and is
    /// reported as corruption.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_array` on this allocator and must not
    /// have been freed already.
    unsafe fn free_array(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = read_array_header(ptr);
        let align = header.align();
        if align < HEADER_SIZE {
            fatal(Violation::CorruptArrayHeader {
                addr: ptr as usize,
                align,
            });
        }
        self.free(ptr.sub(align), header.size(), align);
    }
}

impl<A: Allocator + ?Sized> ArrayAllocExt for A {}
