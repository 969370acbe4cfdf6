//! ## minne-core::zone
//! **Named budgets and per-thread attribution of allocations**
//!
//! A [`ZoneRegistry`] holds a fixed table of zones. Each thread has a current
//! zone (see [`ScopedZone`]), and a [`ZonedAllocator`] charges every request it
//! serves to the caller's current zone before forwarding it.

pub mod context;
pub mod registry;
pub mod stats;
pub mod zoned;

pub use context::{current_zone, set_current_zone, with_zone, ScopedZone};
pub use registry::{
    BudgetPolicy, BudgetStatus, Reservation, Zone, ZoneBudget, ZoneId, ZoneRegistry, ZoneSnapshot,
    DEFAULT_ZONE, MAX_ZONE_NAME_LEN,
};
pub use stats::{FreeMismatch, ReserveRefused, ZoneCounters};
pub use zoned::ZonedAllocator;
