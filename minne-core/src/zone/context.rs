//! ## minne-core::zone::context
//! **Per-thread current zone**
//!
//! Each thread carries the id of the zone its allocations are charged to.
//! The value is strictly thread-local: entering a zone on one thread is
//! invisible to every other thread.
//!
//! Zone changes should go through [`ScopedZone`], which restores the previous
//! zone on every exit path, early returns and unwinding included.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::diagnostics::{fatal, Violation};
use crate::zone::registry::{ZoneId, DEFAULT_ZONE};

thread_local! {
    static CURRENT_ZONE: Cell<ZoneId> = const { Cell::new(DEFAULT_ZONE) };
}

/// Zone the calling thread is currently charged to.
#[inline]
pub fn current_zone() -> ZoneId {
    CURRENT_ZONE.with(Cell::get)
}

/// Sets the current zone and returns the previous one.
///
/// Prefer [`ScopedZone`]; this does not restore anything.
#[inline]
pub fn set_current_zone(id: ZoneId) -> ZoneId {
    CURRENT_ZONE.with(|zone| zone.replace(id))
}

/// Guard that makes `zone` current until it is dropped.
///
/// Guards nest without limit and must be released in reverse order of
/// creation, which ordinary scoping does automatically.
#[must_use = "the previous zone is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ScopedZone {
    zone: ZoneId,
    previous: ZoneId,
    // Thread-local state: the guard must be dropped on the thread that made it.
    _not_send: PhantomData<*const ()>,
}

impl ScopedZone {
    pub fn enter(zone: ZoneId) -> Self {
        let previous = set_current_zone(zone);
        Self {
            zone,
            previous,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    #[inline]
    pub fn previous(&self) -> ZoneId {
        self.previous
    }
}

impl Drop for ScopedZone {
    fn drop(&mut self) {
        let found = set_current_zone(self.previous);
        if found != self.zone && !std::thread::panicking() {
            fatal(Violation::ZoneScopeOrder {
                expected: self.zone,
                found,
            });
        }
    }
}

/// Runs `f` with `zone` current.
pub fn with_zone<R>(zone: ZoneId, f: impl FnOnce() -> R) -> R {
    let _scope = ScopedZone::enter(zone);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::thread;

    #[test]
    fn threads_start_in_default_zone() {
        thread::spawn(|| assert_eq!(current_zone(), DEFAULT_ZONE))
            .join()
            .unwrap();
    }

    #[test]
    fn guards_nest_and_restore() {
        let _outer = ScopedZone::enter(1);
        {
            let inner = ScopedZone::enter(2);
            assert_eq!(current_zone(), 2);
            assert_eq!(inner.previous(), 1);
        }
        assert_eq!(current_zone(), 1);
    }

    #[test]
    fn deep_nesting_unwinds_in_order() {
        fn descend(depth: u16) {
            if depth == 0 {
                return;
            }
            let _scope = ScopedZone::enter(depth);
            descend(depth - 1);
            assert_eq!(current_zone(), depth);
        }
        descend(2000);
        assert_eq!(current_zone(), DEFAULT_ZONE);
    }

    #[test]
    fn restored_on_early_return() {
        fn work(bail: bool) -> Result<(), ()> {
            let _scope = ScopedZone::enter(9);
            if bail {
                return Err(());
            }
            Ok(())
        }
        let _ = work(true);
        assert_eq!(current_zone(), DEFAULT_ZONE);
    }

    #[test]
    fn restored_on_panic() {
        let result = panic::catch_unwind(|| {
            let _scope = ScopedZone::enter(5);
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current_zone(), DEFAULT_ZONE);
    }

    #[test]
    fn zone_changes_are_thread_local() {
        let _scope = ScopedZone::enter(4);
        thread::spawn(|| assert_eq!(current_zone(), DEFAULT_ZONE))
            .join()
            .unwrap();
        assert_eq!(current_zone(), 4);
    }

    #[test]
    fn with_zone_scopes_closure() {
        let seen = with_zone(7, current_zone);
        assert_eq!(seen, 7);
        assert_eq!(current_zone(), DEFAULT_ZONE);
    }

    #[test]
    #[should_panic(expected = "restored while")]
    fn out_of_order_release_is_fatal() {
        let outer = ScopedZone::enter(1);
        let _inner = ScopedZone::enter(2);
        drop(outer);
    }
}
