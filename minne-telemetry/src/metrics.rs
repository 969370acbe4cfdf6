//! ## minne-telemetry::metrics
//! **Prometheus gauges for zone counters**
//!
//! Zone counters are sampled, not streamed: call
//! [`MetricsRecorder::record_zones`] with fresh snapshots before gathering.

use minne_core::zone::ZoneSnapshot;
use prometheus::{IntCounter, IntGaugeVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub live_bytes: IntGaugeVec,
    pub peak_bytes: IntGaugeVec,
    pub live_allocations: IntGaugeVec,
    pub peak_allocations: IntGaugeVec,
    pub total_allocations: IntGaugeVec,
    pub total_frees: IntGaugeVec,
    pub overruns: IntGaugeVec,
    pub pool_exhaustions: IntCounter,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let zone_gauge = |name: &str, help: &str| -> Result<IntGaugeVec, prometheus::Error> {
            let gauge = IntGaugeVec::new(Opts::new(name, help), &["zone"])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        let live_bytes = zone_gauge("minne_zone_live_bytes", "Bytes currently allocated")?;
        let peak_bytes = zone_gauge("minne_zone_peak_bytes", "Highest live byte count")?;
        let live_allocations =
            zone_gauge("minne_zone_live_allocations", "Allocations currently live")?;
        let peak_allocations =
            zone_gauge("minne_zone_peak_allocations", "Highest live allocation count")?;
        let total_allocations =
            zone_gauge("minne_zone_allocations_total", "Allocations since start")?;
        let total_frees = zone_gauge("minne_zone_frees_total", "Frees since start")?;
        let overruns = zone_gauge("minne_zone_overruns_total", "Tolerated budget overruns")?;

        let pool_exhaustions = IntCounter::new(
            "minne_pool_exhaustions_total",
            "Pool allocations refused for lack of a free slot",
        )?;
        registry.register(Box::new(pool_exhaustions.clone()))?;

        Ok(Self {
            registry,
            live_bytes,
            peak_bytes,
            live_allocations,
            peak_allocations,
            total_allocations,
            total_frees,
            overruns,
            pool_exhaustions,
        })
    }

    pub fn record_zones(&self, snapshots: &[ZoneSnapshot]) {
        for zone in snapshots {
            let labels = [zone.name.as_str()];
            set(&self.live_bytes, &labels, zone.live_bytes as u64);
            set(&self.peak_bytes, &labels, zone.peak_bytes as u64);
            set(&self.live_allocations, &labels, zone.live_count as u64);
            set(&self.peak_allocations, &labels, zone.peak_count as u64);
            set(&self.total_allocations, &labels, zone.total_allocations);
            set(&self.total_frees, &labels, zone.total_frees);
            set(&self.overruns, &labels, zone.overruns);
        }
    }

    pub fn inc_pool_exhaustions(&self) {
        self.pool_exhaustions.inc();
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn set(gauge: &IntGaugeVec, labels: &[&str], value: u64) {
    gauge
        .with_label_values(labels)
        .set(i64::try_from(value).unwrap_or(i64::MAX));
}
