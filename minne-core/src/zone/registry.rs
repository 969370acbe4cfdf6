//! ## minne-core::zone::registry
//! **Zones and the fixed-capacity zone table**
//!
//! Zones are registered once, normally during single-threaded startup, and
//! live as long as the registry. Identity (id, name, budget) never changes;
//! only the counters move.

use crossbeam::utils::CachePadded;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diagnostics::{fatal, Violation};
use crate::zone::stats::{FreeMismatch, ReserveRefused, ZoneCounters};

pub type ZoneId = u16;

/// Zone every thread is charged to until it enters another one.
pub const DEFAULT_ZONE: ZoneId = 0;

/// Longer names are truncated on registration.
pub const MAX_ZONE_NAME_LEN: usize = 31;

/// What happens when a zone's live bytes would pass its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// The allocation goes through; the overrun shows up in the counters.
    #[default]
    Silent,
    /// The allocation is a contract violation.
    Fatal,
}

/// Byte ceiling of a zone. `bytes == 0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ZoneBudget {
    pub bytes: usize,
    #[serde(default)]
    pub policy: BudgetPolicy,
}

impl ZoneBudget {
    pub const UNLIMITED: Self = Self {
        bytes: 0,
        policy: BudgetPolicy::Silent,
    };

    pub const fn silent(bytes: usize) -> Self {
        Self {
            bytes,
            policy: BudgetPolicy::Silent,
        }
    }

    pub const fn fatal(bytes: usize) -> Self {
        Self {
            bytes,
            policy: BudgetPolicy::Fatal,
        }
    }

    #[inline]
    pub const fn is_unlimited(&self) -> bool {
        self.bytes == 0
    }
}

/// Bytes charged to a zone ahead of the physical allocation. Either
/// [`Zone::commit`] or [`Zone::cancel`] consumes it.
#[must_use = "a reservation must be committed or cancelled"]
#[derive(Debug)]
pub struct Reservation {
    size: usize,
    live: usize,
}

impl Reservation {
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Outcome of [`Zone::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Within,
    Exceeded,
}

/// Point-in-time copy of a zone's identity and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneSnapshot {
    pub id: ZoneId,
    pub name: String,
    pub budget: ZoneBudget,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub live_count: usize,
    pub peak_count: usize,
    pub total_allocations: u64,
    pub total_frees: u64,
    pub overruns: u64,
}

/// A named, budgeted accounting bucket.
#[derive(Debug)]
pub struct Zone {
    id: ZoneId,
    name: String,
    budget: ZoneBudget,
    counters: CachePadded<ZoneCounters>,
}

impl Zone {
    fn new(id: ZoneId, name: String, budget: ZoneBudget) -> Self {
        Self {
            id,
            name,
            budget,
            counters: CachePadded::new(ZoneCounters::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> ZoneId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn budget(&self) -> ZoneBudget {
        self.budget
    }

    #[inline]
    pub fn counters(&self) -> &ZoneCounters {
        &self.counters
    }

    /// Reserves `size` bytes against this zone ahead of the physical
    /// allocation.
    ///
    /// A fatal-policy zone refuses to pass its budget and reports a contract
    /// violation. Returns `None` when the live byte count would overflow; the
    /// request cannot be served and nothing is charged.
    pub fn reserve(&self, size: usize) -> Option<Reservation> {
        let enforced = self.budget.policy == BudgetPolicy::Fatal && !self.budget.is_unlimited();
        let ceiling = if enforced {
            self.budget.bytes
        } else {
            usize::MAX
        };

        match self.counters.reserve(size, ceiling) {
            Ok(live) => Some(Reservation { size, live }),
            Err(ReserveRefused::Overflow { live } | ReserveRefused::OverCeiling { live })
                if enforced =>
            {
                fatal(Violation::BudgetExceeded {
                    zone: self.name.clone(),
                    id: self.id,
                    requested: size,
                    live,
                    budget: self.budget.bytes,
                })
            }
            Err(_) => {
                debug!(zone = %self.name, id = self.id, size, "Zone live bytes would overflow");
                None
            }
        }
    }

    /// Turns a reservation into a recorded allocation: counts it, raises the
    /// peaks and, past a silent budget, records the overrun.
    pub fn commit(&self, reservation: Reservation) -> BudgetStatus {
        let Reservation { size, live } = reservation;
        self.counters.commit_allocation(live);
        if self.budget.is_unlimited() || live <= self.budget.bytes {
            return BudgetStatus::Within;
        }

        self.counters.record_overrun();
        debug!(
            zone = %self.name,
            id = self.id,
            size,
            live,
            budget = self.budget.bytes,
            "Zone budget exceeded"
        );
        BudgetStatus::Exceeded
    }

    /// Releases a reservation whose physical allocation failed.
    pub fn cancel(&self, reservation: Reservation) {
        self.counters.cancel_reservation(reservation.size);
    }

    /// Reserves and commits `size` bytes in one step.
    pub fn track_allocation(&self, size: usize) -> Option<BudgetStatus> {
        self.reserve(size).map(|reservation| self.commit(reservation))
    }

    /// Releases `size` bytes previously charged to this zone.
    pub fn track_free(&self, size: usize) {
        match self.counters.record_free(size) {
            Ok(()) => {}
            Err(FreeMismatch::NothingLive) => fatal(Violation::FreeWithoutAllocation {
                zone: self.name.clone(),
                id: self.id,
                size,
            }),
            Err(FreeMismatch::ExceedsLive { live }) => fatal(Violation::FreeExceedsLive {
                zone: self.name.clone(),
                id: self.id,
                size,
                live,
            }),
        }
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            id: self.id,
            name: self.name.clone(),
            budget: self.budget,
            live_bytes: self.counters.live_bytes(),
            peak_bytes: self.counters.peak_bytes(),
            live_count: self.counters.live_count(),
            peak_count: self.counters.peak_count(),
            total_allocations: self.counters.total_allocations(),
            total_frees: self.counters.total_frees(),
            overruns: self.counters.overruns(),
        }
    }
}

/// Fixed-capacity table of zones indexed by id.
#[derive(Debug)]
pub struct ZoneRegistry {
    slots: Box<[OnceCell<Zone>]>,
}

impl ZoneRegistry {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// # Panics
    ///
    /// If `capacity` is zero or exceeds the id space.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            capacity <= usize::from(ZoneId::MAX) + 1,
            "Capacity exceeds the zone id space"
        );
        Self {
            slots: (0..capacity).map(|_| OnceCell::new()).collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of registered zones.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Registers a zone.
    ///
    /// An id beyond capacity, or one already taken, is a contract violation.
    pub fn register(&self, name: &str, id: ZoneId, budget: ZoneBudget) -> &Zone {
        let Some(slot) = self.slots.get(usize::from(id)) else {
            fatal(Violation::ZoneIdOutOfRange {
                id,
                capacity: self.capacity(),
            });
        };

        let name = truncate_name(name);
        let mut fresh = false;
        let zone = slot.get_or_init(|| {
            fresh = true;
            Zone::new(id, name.clone(), budget)
        });
        if !fresh {
            fatal(Violation::DuplicateZone {
                id,
                existing: zone.name.clone(),
                name,
            });
        }

        info!(
            zone = %zone.name,
            id,
            budget_bytes = budget.bytes,
            policy = ?budget.policy,
            "Registered memory zone"
        );
        zone
    }

    /// Looks up a registered zone. Unknown and out-of-range ids give `None`.
    #[inline]
    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.slots.get(usize::from(id))?.get()
    }

    /// Looks up a zone that must exist; a miss is a contract violation.
    #[inline]
    pub fn zone(&self, id: ZoneId) -> &Zone {
        match self.get(id) {
            Some(zone) => zone,
            None => fatal(Violation::UnknownZone { id }),
        }
    }

    /// Registered zones in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.slots.iter().filter_map(OnceCell::get)
    }

    pub fn snapshots(&self) -> Vec<ZoneSnapshot> {
        self.iter().map(Zone::snapshot).collect()
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_ZONE_NAME_LEN {
        return name.to_owned();
    }
    let mut end = MAX_ZONE_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}
