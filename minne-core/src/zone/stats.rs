//! ## minne-core::zone::stats
//! **Per-zone allocation counters**
//!
//! All counters are atomics updated without locks. Peaks are raised with a
//! compare-and-retry loop so they never fall below a value some thread
//! actually observed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Why a free could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeMismatch {
    /// No allocation is live in this zone.
    NothingLive,
    /// The size exceeds the live byte count.
    ExceedsLive { live: usize },
}

/// Why a reservation was refused. Carries the live total seen at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveRefused {
    /// The live byte count would overflow.
    Overflow { live: usize },
    /// The live byte count would pass the ceiling.
    OverCeiling { live: usize },
}

/// Live, peak and lifetime counters of one zone.
#[derive(Debug, Default)]
pub struct ZoneCounters {
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    live_count: AtomicUsize,
    peak_count: AtomicUsize,
    total_allocations: AtomicU64,
    total_frees: AtomicU64,
    overruns: AtomicU64,
}

impl ZoneCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `size` to the live bytes unless the total would overflow or pass
    /// `ceiling`, and returns the new live total.
    ///
    /// Only the live bytes move. The reservation must be followed by
    /// [`commit_allocation`](Self::commit_allocation) once the memory exists,
    /// or by [`cancel_reservation`](Self::cancel_reservation) if it never will.
    pub fn reserve(&self, size: usize, ceiling: usize) -> Result<usize, ReserveRefused> {
        let mut live = self.live_bytes.load(Ordering::Acquire);
        loop {
            let next = match live.checked_add(size) {
                None => return Err(ReserveRefused::Overflow { live }),
                Some(next) if next > ceiling => return Err(ReserveRefused::OverCeiling { live }),
                Some(next) => next,
            };
            match self.live_bytes.compare_exchange_weak(
                live,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => live = actual,
            }
        }
    }

    /// Completes a reservation. `live` is the total [`reserve`](Self::reserve)
    /// returned for it.
    pub fn commit_allocation(&self, live: usize) {
        let count = self.live_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        raise_peak(&self.peak_bytes, live);
        raise_peak(&self.peak_count, count);
    }

    /// Drops a reservation whose physical allocation failed.
    pub fn cancel_reservation(&self, size: usize) {
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
    }

    /// Reserves and commits in one step, returning the new live total.
    #[inline]
    pub fn record_allocation(&self, size: usize) -> Result<usize, ReserveRefused> {
        let live = self.reserve(size, usize::MAX)?;
        self.commit_allocation(live);
        Ok(live)
    }

    /// Records a free of `size` bytes.
    ///
    /// Counters are never driven below zero: a free with nothing live, or
    /// larger than the live bytes, is rejected and leaves them unchanged.
    pub fn record_free(&self, size: usize) -> Result<(), FreeMismatch> {
        let mut count = self.live_count.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return Err(FreeMismatch::NothingLive);
            }
            match self.live_count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => count = actual,
            }
        }

        let mut live = self.live_bytes.load(Ordering::Acquire);
        loop {
            if size > live {
                self.live_count.fetch_add(1, Ordering::AcqRel);
                return Err(FreeMismatch::ExceedsLive { live });
            }
            match self.live_bytes.compare_exchange_weak(
                live,
                live - size,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => live = actual,
            }
        }

        self.total_frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Increments the count of tolerated budget overruns.
    #[inline]
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Acquire)
    }

    pub fn live_count(&self) -> usize {
        self.live_count.load(Ordering::Acquire)
    }

    pub fn peak_count(&self) -> usize {
        self.peak_count.load(Ordering::Acquire)
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations.load(Ordering::Relaxed)
    }

    pub fn total_frees(&self) -> u64 {
        self.total_frees.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

fn raise_peak(peak: &AtomicUsize, value: usize) {
    let mut current = peak.load(Ordering::Relaxed);
    while value > current {
        match peak.compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn allocation_and_free_update_counters() {
        let counters = ZoneCounters::new();
        assert_eq!(counters.record_allocation(100), Ok(100));
        assert_eq!(counters.record_allocation(50), Ok(150));
        counters.record_free(100).unwrap();

        assert_eq!(counters.live_bytes(), 50);
        assert_eq!(counters.peak_bytes(), 150);
        assert_eq!(counters.live_count(), 1);
        assert_eq!(counters.peak_count(), 2);
        assert_eq!(counters.total_allocations(), 2);
        assert_eq!(counters.total_frees(), 1);
    }

    #[test]
    fn free_mismatches_leave_counters_untouched() {
        let counters = ZoneCounters::new();
        assert_eq!(counters.record_free(8), Err(FreeMismatch::NothingLive));

        counters.record_allocation(16).unwrap();
        assert_eq!(
            counters.record_free(32),
            Err(FreeMismatch::ExceedsLive { live: 16 })
        );
        assert_eq!(counters.live_bytes(), 16);
        assert_eq!(counters.live_count(), 1);
        assert_eq!(counters.total_frees(), 0);
    }

    #[test]
    fn ceiling_refuses_without_recording() {
        let counters = ZoneCounters::new();
        let live = counters.reserve(600, 1024).unwrap();
        counters.commit_allocation(live);
        assert_eq!(
            counters.reserve(600, 1024),
            Err(ReserveRefused::OverCeiling { live: 600 })
        );
        assert_eq!(counters.live_bytes(), 600);
        assert_eq!(counters.peak_bytes(), 600);
        assert_eq!(counters.total_allocations(), 1);
    }

    #[test]
    fn cancelled_reservation_leaves_no_trace() {
        let counters = ZoneCounters::new();
        counters.record_allocation(32).unwrap();
        let live = counters.reserve(1 << 20, usize::MAX).unwrap();
        assert_eq!(live, 32 + (1 << 20));
        counters.cancel_reservation(1 << 20);

        assert_eq!(counters.live_bytes(), 32);
        assert_eq!(counters.live_count(), 1);
        assert_eq!(counters.peak_bytes(), 32);
        assert_eq!(counters.peak_count(), 1);
        assert_eq!(counters.total_allocations(), 1);
    }

    #[test]
    fn overflowing_reservation_is_refused() {
        let counters = ZoneCounters::new();
        counters.record_allocation(64).unwrap();
        assert_eq!(
            counters.record_allocation(usize::MAX - 8),
            Err(ReserveRefused::Overflow { live: 64 })
        );
        assert_eq!(counters.live_bytes(), 64);
        counters.record_free(64).unwrap();
        assert_eq!(counters.live_bytes(), 0);
    }

    #[test]
    fn concurrent_updates_stay_consistent() {
        let counters = Arc::new(ZoneCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for i in 0..10_000 {
                        let size = 1 + (t * 31 + i) % 97;
                        counters.record_allocation(size).unwrap();
                        counters.record_free(size).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counters.live_bytes(), 0);
        assert_eq!(counters.live_count(), 0);
        assert_eq!(counters.total_allocations(), 80_000);
        assert_eq!(counters.total_frees(), 80_000);
        assert!(counters.peak_bytes() >= 97);
        assert!(counters.peak_count() >= 1 && counters.peak_count() <= 8);
    }

    proptest! {
        #[test]
        fn live_bytes_track_outstanding_sizes(
            ops in prop::collection::vec((any::<bool>(), 1usize..4096), 1..200),
        ) {
            let counters = ZoneCounters::new();
            let mut outstanding: Vec<usize> = Vec::new();
            let mut max_seen = 0;

            for (alloc, size) in ops {
                if alloc || outstanding.is_empty() {
                    counters.record_allocation(size).unwrap();
                    outstanding.push(size);
                } else {
                    let size = outstanding.pop().unwrap();
                    counters.record_free(size).unwrap();
                }
                let expected: usize = outstanding.iter().sum();
                max_seen = max_seen.max(expected);
                prop_assert_eq!(counters.live_bytes(), expected);
                prop_assert_eq!(counters.live_count(), outstanding.len());
                prop_assert!(counters.peak_bytes() >= counters.live_bytes());
            }
            prop_assert_eq!(counters.peak_bytes(), max_seen);
        }
    }
}
