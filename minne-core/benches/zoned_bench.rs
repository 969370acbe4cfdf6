#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};

use minne_core::prelude::*;

fn zoned_context() -> MemoryContext {
    let context = MemoryContext::new(8);
    context.register_zone("default", DEFAULT_ZONE, ZoneBudget::UNLIMITED);
    context.register_zone("bench", 1, ZoneBudget::silent(1 << 30));
    context.install_zoned_allocator();
    context
}

fn bench_zoned_allocate_free(c: &mut Criterion) {
    let context = zoned_context();
    let _scope = ScopedZone::enter(1);
    c.bench_function("zoned_allocate_free_64", |b| {
        b.iter(|| {
            let ptr = context.allocate(black_box(64), 8).unwrap();
            unsafe { context.free(ptr.as_ptr(), 64, 8) };
        })
    });
}

fn bench_system_allocate_free(c: &mut Criterion) {
    let context = MemoryContext::new(1);
    c.bench_function("system_allocate_free_64", |b| {
        b.iter(|| {
            let ptr = context.allocate(black_box(64), 8).unwrap();
            unsafe { context.free(ptr.as_ptr(), 64, 8) };
        })
    });
}

fn bench_zoned_array(c: &mut Criterion) {
    let context = zoned_context();
    c.bench_function("zoned_array_allocate_free_256", |b| {
        b.iter(|| {
            let ptr = context.allocate_array(black_box(256), 16).unwrap();
            unsafe { context.free_array(ptr.as_ptr()) };
        })
    });
}

fn bench_scoped_zone(c: &mut Criterion) {
    c.bench_function("scoped_zone_enter_exit", |b| {
        b.iter(|| {
            let scope = ScopedZone::enter(black_box(3));
            black_box(current_zone());
            drop(scope);
        })
    });
}

criterion_group!(
    benches,
    bench_zoned_allocate_free,
    bench_system_allocate_free,
    bench_zoned_array,
    bench_scoped_zone
);
criterion_main!(benches);
