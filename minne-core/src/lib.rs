//! # minne-core
//!
//! Memory accounting layer: every allocation is charged to a named zone with a
//! byte budget, fixed-size objects come out of preallocated pools, and array
//! allocations carry a hidden header so they can be released without the caller
//! remembering their layout.
//!
//! ### Expectations (Production):
//! - Lock-free zone counters, safe to hammer from any number of threads
//! - Zero heap allocations on pool allocate/free
//! - Broken allocator invariants stop the process instead of corrupting memory
//!
//! ### Key Submodules:
//! - `alloc`: allocator trait, system/underlying allocators, array headers, pools
//! - `zone`: zone registry, budget counters, current-zone context, zoned allocator
//! - `context`: the `MemoryContext` tying registry and underlying allocator together
//! - `queue`: bounded ring buffer with explicit backpressure
//! - `diagnostics`: fatal contract-violation reporting

pub mod alloc;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod queue;
pub mod zone;

pub mod prelude {
    pub use crate::alloc::array::ArrayAllocExt;
    pub use crate::alloc::pool::{PoolExhausted, RawPool};
    pub use crate::alloc::system::SystemAllocator;
    pub use crate::alloc::typed_pool::{Pool, PoolHandle};
    pub use crate::alloc::underlying::UnderlyingAllocator;
    pub use crate::alloc::Allocator;
    pub use crate::context::MemoryContext;
    pub use crate::error::*;
    pub use crate::queue::{BoundedQueue, QueueError, QueueFull};
    pub use crate::zone::*;
}

pub use context::{register_zone, set_underlying_allocator, MemoryContext};
pub use error::AllocError;
