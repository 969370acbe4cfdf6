//! ## minne-core::alloc
//! **Allocator capability, backing allocators, pools and array headers**
//!
//! ### Key Submodules:
//! - `system/`: the system heap, bottom of every allocator stack
//! - `underlying/`: swappable process-level allocator slot
//! - `array/`: self-describing array allocations
//! - `pool/`: fixed-size slot pool with an intrusive free list
//! - `typed_pool/`: typed pool over tagged slots with stable handles

pub mod array;
pub mod pool;
pub mod system;
pub mod typed_pool;
pub mod underlying;

use std::ptr::NonNull;

use crate::error::AllocError;

/// The allocation contract every layer of the stack speaks.
///
/// Implementations must be usable from any thread.
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes aligned to `align`.
    ///
    /// `align` must be a non-zero power of two no smaller than the
    /// implementation's minimum, otherwise [`AllocError::AlignmentViolation`].
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError>;

    /// Releases memory obtained from [`Allocator::allocate`].
    ///
    /// A null `ptr` is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same `size`
    /// and `align`, and must not have been freed already. The allocator keeps no
    /// record of sizes, so a mismatch is undefined behavior rather than an error.
    unsafe fn free(&self, ptr: *mut u8, size: usize, align: usize);
}

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Checks `align` against the allocator contract.
#[inline]
pub fn check_align(align: usize, min: usize) -> Result<(), AllocError> {
    if align.is_power_of_two() && align >= min {
        Ok(())
    } else {
        Err(AllocError::AlignmentViolation { align, min })
    }
}
