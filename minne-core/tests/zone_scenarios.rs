use std::alloc::Layout;
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use minne_core::prelude::*;

const RENDER: ZoneId = 1;
const AUDIO: ZoneId = 2;

fn zoned_context() -> MemoryContext {
    let context = MemoryContext::new(8);
    context.register_zone("default", DEFAULT_ZONE, ZoneBudget::UNLIMITED);
    context.register_zone("render", RENDER, ZoneBudget::UNLIMITED);
    context.register_zone("audio", AUDIO, ZoneBudget::silent(1 << 16));
    context.install_zoned_allocator();
    context
}

#[test]
fn silent_budget_overrun_still_allocates() {
    let context = MemoryContext::new(4);
    context.register_zone("main", DEFAULT_ZONE, ZoneBudget::silent(1024));
    context.install_zoned_allocator();

    let first = context.allocate(600, 8).unwrap();
    let second = context.allocate(600, 8).unwrap();

    let snapshot = context.registry().zone(DEFAULT_ZONE).snapshot();
    assert_eq!(snapshot.live_bytes, 1200);
    assert_eq!(snapshot.overruns, 1);
    assert_eq!(snapshot.peak_bytes, 1200);

    unsafe {
        context.free(first.as_ptr(), 600, 8);
        context.free(second.as_ptr(), 600, 8);
    }
    assert_eq!(context.registry().zone(DEFAULT_ZONE).snapshot().live_bytes, 0);
}

#[test]
#[should_panic(expected = "budget exceeded")]
fn fatal_budget_overrun_halts() {
    let context = MemoryContext::new(2);
    context.register_zone("strict", DEFAULT_ZONE, ZoneBudget::fatal(1024));
    context.install_zoned_allocator();

    let _first = context.allocate(600, 8).unwrap();
    let _ = context.allocate(600, 8);
}

#[test]
fn nested_scopes_attribute_to_innermost_zone() {
    let context = zoned_context();
    let registry = context.registry();

    let outer = ScopedZone::enter(RENDER);
    let inner = ScopedZone::enter(AUDIO);
    let in_audio = context.allocate(48, 8).unwrap();
    drop(inner);
    assert_eq!(current_zone(), RENDER);
    let in_render = context.allocate(80, 8).unwrap();

    assert_eq!(registry.zone(AUDIO).counters().live_bytes(), 48);
    assert_eq!(registry.zone(RENDER).counters().live_bytes(), 80);
    assert_eq!(registry.zone(DEFAULT_ZONE).counters().live_bytes(), 0);

    unsafe { context.free(in_render.as_ptr(), 80, 8) };
    with_zone(AUDIO, || unsafe { context.free(in_audio.as_ptr(), 48, 8) });
    drop(outer);
    assert_eq!(current_zone(), DEFAULT_ZONE);
}

#[test]
fn pool_exhaustion_and_slot_reuse() {
    let context = zoned_context();
    let exhausted = Arc::new(AtomicUsize::new(0));

    let _scope = ScopedZone::enter(RENDER);
    let layout = Layout::from_size_align(16, 8).unwrap();
    let mut pool = RawPool::new(context.allocator(), 4, layout)
        .unwrap()
        .with_label("particles");
    let counter = exhausted.clone();
    pool.set_oom_handler(move |info| {
        assert_eq!(info.label, "particles");
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let slots: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
    assert!(pool.allocate().is_none());
    assert_eq!(exhausted.load(Ordering::Relaxed), 1);

    unsafe { pool.free(slots[2]) };
    assert_eq!(pool.allocate(), Some(slots[2]));

    // The whole buffer is one allocation in the zone that was current at creation.
    let counters = context.registry().zone(RENDER).counters();
    assert_eq!(counters.live_count(), 1);
    assert_eq!(counters.live_bytes(), 64);
}

#[test]
fn threads_charge_their_own_zones() {
    let context = zoned_context();

    thread::scope(|scope| {
        for (zone, size) in [(RENDER, 24usize), (AUDIO, 40), (RENDER, 56), (AUDIO, 8)] {
            let context = &context;
            scope.spawn(move || {
                let _zone = ScopedZone::enter(zone);
                let mut live = Vec::new();
                for round in 0..2_000 {
                    live.push(context.allocate(size, 8).unwrap());
                    if round % 3 == 0 {
                        for ptr in live.drain(..) {
                            unsafe { context.free(ptr.as_ptr(), size, 8) };
                        }
                    }
                }
                for ptr in live {
                    unsafe { context.free(ptr.as_ptr(), size, 8) };
                }
            });
        }
    });

    for zone in [RENDER, AUDIO] {
        let snapshot = context.registry().zone(zone).snapshot();
        assert_eq!(snapshot.live_bytes, 0, "zone {zone}");
        assert_eq!(snapshot.live_count, 0);
        assert_eq!(snapshot.total_allocations, 4_000);
        assert_eq!(snapshot.total_frees, 4_000);
        assert!(snapshot.peak_bytes > 0);
    }
    assert_eq!(context.registry().zone(DEFAULT_ZONE).snapshot().total_allocations, 0);
}

#[test]
fn arrays_round_trip_through_zoned_context() {
    let context = zoned_context();
    let _scope = ScopedZone::enter(AUDIO);

    let samples = context
        .allocate_array(size_of::<f32>() * 512, align_of::<f32>())
        .unwrap()
        .cast::<f32>();
    unsafe {
        for i in 0..512 {
            samples.as_ptr().add(i).write(i as f32);
        }
        assert_eq!(samples.as_ptr().add(511).read(), 511.0);
    }
    let counters = context.registry().zone(AUDIO).counters();
    assert_eq!(counters.live_bytes(), 2048 + 8);

    unsafe { context.free_array(samples.as_ptr().cast()) };
    assert_eq!(counters.live_bytes(), 0);
}

#[test]
#[should_panic(expected = "registered twice")]
fn duplicate_registration_halts() {
    let context = zoned_context();
    context.register_zone("render-again", RENDER, ZoneBudget::UNLIMITED);
}

proptest! {
    #[test]
    fn zoned_live_bytes_match_outstanding(
        ops in prop::collection::vec((any::<bool>(), 1usize..2048, 0usize..3), 1..150),
    ) {
        let context = zoned_context();
        let zones = [DEFAULT_ZONE, RENDER, AUDIO];
        let mut outstanding: HashMap<ZoneId, Vec<(NonNull<u8>, usize)>> = HashMap::new();
        let mut peaks: HashMap<ZoneId, usize> = HashMap::new();

        for (alloc, size, which) in ops {
            let zone = zones[which];
            let _scope = ScopedZone::enter(zone);
            let live = outstanding.entry(zone).or_default();
            if alloc || live.is_empty() {
                live.push((context.allocate(size, 8).unwrap(), size));
            } else {
                let (ptr, size) = live.swap_remove(0);
                unsafe { context.free(ptr.as_ptr(), size, 8) };
            }

            let expected: usize = live.iter().map(|(_, size)| size).sum();
            let peak = peaks.entry(zone).or_default();
            *peak = (*peak).max(expected);
            let counters = context.registry().zone(zone).counters();
            prop_assert_eq!(counters.live_bytes(), expected);
            prop_assert_eq!(counters.peak_bytes(), *peak);
        }

        for (zone, live) in outstanding {
            let _scope = ScopedZone::enter(zone);
            for (ptr, size) in live {
                unsafe { context.free(ptr.as_ptr(), size, 8) };
            }
        }
    }
}
