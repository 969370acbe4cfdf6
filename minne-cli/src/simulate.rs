//! Multi-threaded allocation workload.
//!
//! Every worker owns a home zone, holds a raw pool and a typed pool charged to
//! it, and on each iteration enters a randomly chosen zone to make sized and
//! array allocations through the context's allocator. Progress samples flow
//! back to the calling thread through a [`BoundedQueue`]. When the workers are
//! done every zone must be back to zero live bytes.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use minne_config::MinneConfig;
use minne_core::alloc::array::ArrayAllocExt;
use minne_core::alloc::pool::RawPool;
use minne_core::alloc::typed_pool::{Pool, PoolHandle};
use minne_core::queue::{BoundedQueue, QueueFull};
use minne_core::zone::{ScopedZone, ZoneId, ZoneSnapshot};
use minne_core::MemoryContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::commands::SimulateArgs;

const RAW_POOL_SLOTS: usize = 64;
const PARTICLES: usize = 128;
const SAMPLE_EVERY: usize = 256;
const MAX_ALLOCATION: usize = 4096;
const MAX_ARRAY_LEN: usize = 512;

#[derive(Debug)]
pub struct SimulationReport {
    pub workers: usize,
    pub allocations: u64,
    pub samples: usize,
    pub pool_exhaustions: u64,
    pub snapshots: Vec<ZoneSnapshot>,
}

/// Progress record sent from a worker.
#[derive(Debug, Clone, Copy)]
struct Sample {
    worker: usize,
    iteration: usize,
    zone: ZoneId,
}

#[derive(Debug, Clone, Copy, Default)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    ttl: u32,
}

struct Worker<'a> {
    id: usize,
    context: &'a MemoryContext,
    zones: &'a [ZoneId],
    min_align: usize,
    zero_pool_slots: bool,
    iterations: usize,
    samples: BoundedQueue<Sample>,
    exhaustions: Arc<AtomicU64>,
    rng: StdRng,
}

impl Worker<'_> {
    fn run(mut self) -> anyhow::Result<u64> {
        let home = self.zones[self.id % self.zones.len()];
        let _home = ScopedZone::enter(home);

        let layout = Layout::from_size_align(64, self.min_align.max(8))?;
        let mut raw = RawPool::new(self.context.allocator(), RAW_POOL_SLOTS, layout)?
            .with_label(format!("worker-{}-raw", self.id));
        raw.set_zero_on_alloc(self.zero_pool_slots);
        let exhaustions = self.exhaustions.clone();
        raw.set_oom_handler(move |_| {
            exhaustions.fetch_add(1, Ordering::Relaxed);
        });

        let mut particles: Pool<Particle> =
            Pool::new_aligned(self.context.allocator(), PARTICLES, self.min_align)?
                .with_label(format!("worker-{}-particles", self.id));
        let exhaustions = self.exhaustions.clone();
        particles.set_oom_handler(move |_| {
            exhaustions.fetch_add(1, Ordering::Relaxed);
        });

        let mut raw_live: Vec<NonNull<u8>> = Vec::with_capacity(RAW_POOL_SLOTS);
        let mut particle_live: Vec<PoolHandle> = Vec::with_capacity(PARTICLES);
        let mut allocations = 0u64;

        for iteration in 0..self.iterations {
            let zone = self.zones[self.rng.random_range(0..self.zones.len())];
            {
                let _scope = ScopedZone::enter(zone);
                self.sized_allocation()?;
                self.array_allocation()?;
                allocations += 2;
            }

            self.churn_raw(&mut raw, &mut raw_live);
            self.churn_particles(&mut particles, &mut particle_live);

            if iteration % SAMPLE_EVERY == 0 {
                self.send(Sample {
                    worker: self.id,
                    iteration,
                    zone,
                });
            }
        }

        for slot in raw_live {
            // SAFETY: every pointer in `raw_live` came from `raw` and is live.
            unsafe { raw.free(slot) };
        }
        for handle in particle_live {
            particles.free(handle);
        }
        debug!(worker = self.id, allocations, "Worker finished");
        Ok(allocations)
    }

    fn align(&mut self) -> usize {
        let align = 1usize << self.rng.random_range(3u32..=6);
        align.max(self.min_align)
    }

    fn sized_allocation(&mut self) -> anyhow::Result<()> {
        let size = self.rng.random_range(1..=MAX_ALLOCATION);
        let align = self.align();
        let allocator = self.context.allocator();
        let ptr = allocator.allocate(size, align)?;
        // SAFETY: `ptr` points at `size` writable bytes and is freed with the
        // same size and alignment.
        unsafe {
            ptr.as_ptr().write_bytes(0xA5, size);
            allocator.free(ptr.as_ptr(), size, align);
        }
        Ok(())
    }

    fn array_allocation(&mut self) -> anyhow::Result<()> {
        let len = self.rng.random_range(1..=MAX_ARRAY_LEN);
        let align = self.align();
        let allocator = self.context.allocator();
        let ptr = allocator.allocate_array(len * 8, align)?;
        // SAFETY: the array holds `len` u64 values and came from
        // `allocate_array` on the same allocator.
        unsafe {
            let values = ptr.cast::<u64>().as_ptr();
            for i in 0..len {
                values.add(i).write(i as u64);
            }
            allocator.free_array(ptr.as_ptr());
        }
        Ok(())
    }

    fn churn_raw(&mut self, pool: &mut RawPool, live: &mut Vec<NonNull<u8>>) {
        if live.is_empty() || self.rng.random_bool(0.55) {
            if let Some(slot) = pool.allocate() {
                live.push(slot);
            }
        } else {
            let slot = live.swap_remove(self.rng.random_range(0..live.len()));
            // SAFETY: `slot` came from this pool and is removed from `live`.
            unsafe { pool.free(slot) };
        }
    }

    fn churn_particles(&mut self, pool: &mut Pool<Particle>, live: &mut Vec<PoolHandle>) {
        if live.is_empty() || self.rng.random_bool(0.55) {
            let particle = Particle {
                velocity: [self.rng.random(), self.rng.random(), self.rng.random()],
                ttl: self.rng.random_range(1..=64),
                ..Particle::default()
            };
            if let Ok(handle) = pool.allocate(particle) {
                live.push(handle);
            }
        } else {
            let handle = live.swap_remove(self.rng.random_range(0..live.len()));
            pool.free(handle);
        }

        pool.for_each_mut(|_, particle| {
            for axis in 0..3 {
                particle.position[axis] += particle.velocity[axis];
            }
            particle.ttl = particle.ttl.saturating_sub(1);
        });
    }

    fn send(&self, sample: Sample) {
        let mut sample = sample;
        while let Err(QueueFull(back)) = self.samples.try_push(sample) {
            sample = back;
            thread::yield_now();
        }
    }
}

/// Runs the workload and returns the final zone snapshots.
///
/// Fails if any worker fails or if a zone still has live bytes afterwards.
pub fn run(
    context: &MemoryContext,
    config: &MinneConfig,
    args: &SimulateArgs,
) -> anyhow::Result<SimulationReport> {
    let workers = args.threads.unwrap_or_else(num_cpus::get).max(1);
    let zones: Vec<ZoneId> = context.registry().iter().map(|zone| zone.id()).collect();
    let samples = BoundedQueue::with_capacity(config.queue.capacity)?;
    let exhaustions = Arc::new(AtomicU64::new(0));

    info!(
        workers,
        iterations = args.iterations,
        seed = args.seed,
        zones = zones.len(),
        "Starting simulation"
    );

    let mut received = Vec::new();
    let results: Vec<anyhow::Result<u64>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    context,
                    zones: &zones,
                    min_align: config.memory.min_align,
                    zero_pool_slots: config.memory.zero_pool_slots,
                    iterations: args.iterations,
                    samples: samples.share(),
                    exhaustions: exhaustions.clone(),
                    rng: StdRng::seed_from_u64(args.seed.wrapping_add(id as u64)),
                };
                thread::Builder::new()
                    .name(format!("minne-worker-{id}"))
                    .spawn_scoped(scope, move || worker.run())
            })
            .collect();

        while handles
            .iter()
            .any(|handle| handle.as_ref().is_ok_and(|h| !h.is_finished()))
        {
            received.extend(samples.pop_timeout(Duration::from_millis(5)));
        }

        handles
            .into_iter()
            .enumerate()
            .map(|(id, handle)| {
                handle?
                    .join()
                    .map_err(|_| anyhow!("worker {id} panicked"))?
            })
            .collect()
    });
    received.extend(samples.drain());

    let mut allocations = 0;
    for result in results {
        allocations += result?;
    }
    for sample in &received {
        debug!(
            worker = sample.worker,
            iteration = sample.iteration,
            zone = sample.zone,
            "Progress"
        );
    }

    let snapshots = context.registry().snapshots();
    if let Some(leak) = snapshots.iter().find(|zone| zone.live_bytes != 0) {
        bail!(
            "zone '{}' still holds {} bytes in {} allocations",
            leak.name,
            leak.live_bytes,
            leak.live_count
        );
    }

    Ok(SimulationReport {
        workers,
        allocations,
        samples: received.len(),
        pool_exhaustions: exhaustions.load(Ordering::Relaxed),
        snapshots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::build_context;
    use minne_config::ZoneConfig;
    use minne_core::zone::BudgetPolicy;

    fn args(threads: usize, iterations: usize) -> SimulateArgs {
        SimulateArgs {
            threads: Some(threads),
            iterations,
            seed: 7,
            metrics: false,
        }
    }

    fn zoned_config() -> MinneConfig {
        let mut config = MinneConfig::default();
        config.memory.registry_capacity = 8;
        config.queue.capacity = 4;
        config.zones.extend([
            ZoneConfig {
                name: "render".into(),
                id: 1,
                budget_bytes: 0,
                policy: BudgetPolicy::Silent,
            },
            ZoneConfig {
                name: "audio".into(),
                id: 4,
                budget_bytes: 1 << 10,
                policy: BudgetPolicy::Silent,
            },
        ]);
        config
    }

    #[test]
    fn every_zone_ends_empty() {
        let config = zoned_config();
        let context = build_context(&config);
        let report = run(&context, &config, &args(3, 600)).unwrap();

        assert_eq!(report.workers, 3);
        assert_eq!(report.allocations, 3 * 600 * 2);
        assert_eq!(report.samples, 3 * 600usize.div_ceil(SAMPLE_EVERY));
        assert_eq!(report.snapshots.len(), 3);

        let total: u64 = report.snapshots.iter().map(|z| z.total_allocations).sum();
        // Sized and array allocations plus the raw and typed pool blocks of
        // each worker.
        assert_eq!(total, 3 * 600 * 2 + 3 * 2);
        for zone in &report.snapshots {
            assert_eq!(zone.live_bytes, 0, "zone {}", zone.name);
            assert_eq!(zone.total_allocations, zone.total_frees);
        }
    }

    #[test]
    fn tiny_budget_records_overruns() {
        let config = zoned_config();
        let context = build_context(&config);
        run(&context, &config, &args(1, 300)).unwrap();
        let audio = context.registry().zone(4).snapshot();
        assert!(audio.total_allocations > 0);
        assert!(audio.overruns > 0);
    }

    #[test]
    fn same_seed_is_deterministic_per_worker() {
        let config = zoned_config();
        let first = build_context(&config);
        let second = build_context(&config);
        run(&first, &config, &args(1, 200)).unwrap();
        run(&second, &config, &args(1, 200)).unwrap();
        assert_eq!(first.registry().snapshots(), second.registry().snapshots());
    }
}
