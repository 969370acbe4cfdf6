//! Fatal contract-violation reporting.
//!
//! A violation means an allocator invariant is already broken (a free that was
//! never allocated, a pointer that does not belong to a pool, a clobbered array
//! header). Carrying on would risk silent memory corruption, so every violation
//! is logged through `tracing` and then aborts the current thread with a panic.
//! Release builds are compiled with `panic = "abort"`, which turns that into
//! process termination.

use thiserror::Error;
use tracing::error;

use crate::zone::ZoneId;

/// Memory-safety relevant programmer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("zone '{zone}' (id {id}) budget exceeded: {requested} bytes requested with {live} live, budget {budget}")]
    BudgetExceeded {
        zone: String,
        id: ZoneId,
        requested: usize,
        live: usize,
        budget: usize,
    },

    #[error("zone '{zone}' (id {id}) freed {size} bytes but only {live} are live")]
    FreeExceedsLive {
        zone: String,
        id: ZoneId,
        size: usize,
        live: usize,
    },

    #[error("zone '{zone}' (id {id}) freed {size} bytes with no live allocation")]
    FreeWithoutAllocation {
        zone: String,
        id: ZoneId,
        size: usize,
    },

    #[error("zone id {id} registered twice (already '{existing}', now '{name}')")]
    DuplicateZone {
        id: ZoneId,
        existing: String,
        name: String,
    },

    #[error("zone id {id} is outside the registry capacity {capacity}")]
    ZoneIdOutOfRange { id: ZoneId, capacity: usize },

    #[error("zone id {id} is not registered")]
    UnknownZone { id: ZoneId },

    #[error("zone scope for id {expected} restored while id {found} is current")]
    ZoneScopeOrder { expected: ZoneId, found: ZoneId },

    #[error("pool '{pool}': address {addr:#x} is outside the pool buffer")]
    PoolPointerOutOfBounds { pool: String, addr: usize },

    #[error("pool '{pool}': address {addr:#x} is not on a slot boundary")]
    PoolPointerMisaligned { pool: String, addr: usize },

    #[error("pool '{pool}': slot {index} freed twice")]
    PoolDoubleFree { pool: String, index: usize },

    #[error("pool '{pool}': slot index {index} out of range for capacity {capacity}")]
    PoolIndexOutOfRange {
        pool: String,
        index: usize,
        capacity: usize,
    },

    #[error("array header at {addr:#x} records alignment {align}, below the header size")]
    CorruptArrayHeader { addr: usize, align: usize },
}

/// Logs `violation` and never returns.
#[cold]
#[track_caller]
pub fn fatal(violation: Violation) -> ! {
    error!(%violation, "memory contract violation");
    panic!("memory contract violation: {violation}")
}
