//! ## minne-telemetry::logging
//! **Subscriber setup and zone reports**
//!
//! `RUST_LOG` wins over the configured level when it is set.

use minne_config::LogFormat;
use minne_core::zone::ZoneSnapshot;
use tracing::{info, info_span, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug)]
pub struct Logger;

impl Logger {
    /// Installs the global subscriber.
    ///
    /// # Panics
    ///
    /// If a global subscriber is already installed.
    pub fn init(level: &str, format: LogFormat) {
        let builder = fmt()
            .with_env_filter(filter(level))
            .with_thread_names(true);
        match format {
            LogFormat::Plain => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
    }

    /// Like [`init`](Self::init), but reports an already installed
    /// subscriber instead of panicking.
    pub fn try_init(level: &str, format: LogFormat) -> Result<(), InitError> {
        let builder = fmt()
            .with_env_filter(filter(level))
            .with_thread_names(true);
        match format {
            LogFormat::Plain => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        }
    }
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Logs one event per zone inside a `zone_report` span. Zones still holding
/// live allocations are flagged at `warn`.
pub fn log_zone_report(snapshots: &[ZoneSnapshot]) {
    let span = info_span!("zone_report", zones = snapshots.len());
    let _enter = span.enter();

    for zone in snapshots {
        info!(
            zone = %zone.name,
            id = zone.id,
            budget_bytes = zone.budget.bytes,
            live_bytes = zone.live_bytes,
            peak_bytes = zone.peak_bytes,
            live_count = zone.live_count,
            peak_count = zone.peak_count,
            total_allocations = zone.total_allocations,
            total_frees = zone.total_frees,
            overruns = zone.overruns,
            "Zone usage"
        );
        if zone.live_bytes != 0 {
            warn!(
                zone = %zone.name,
                live_bytes = zone.live_bytes,
                live_count = zone.live_count,
                "Zone still holds live allocations"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minne_core::zone::ZoneBudget;
    use tracing_test::traced_test;

    fn snapshot(name: &str, live_bytes: usize) -> ZoneSnapshot {
        ZoneSnapshot {
            id: 1,
            name: name.into(),
            budget: ZoneBudget::silent(4096),
            live_bytes,
            peak_bytes: 2048,
            live_count: usize::from(live_bytes > 0),
            peak_count: 3,
            total_allocations: 10,
            total_frees: 10,
            overruns: 0,
        }
    }

    #[traced_test]
    #[test]
    fn report_logs_every_zone() {
        log_zone_report(&[snapshot("render", 0), snapshot("audio", 0)]);
        assert!(logs_contain("Zone usage"));
        assert!(logs_contain("render"));
        assert!(logs_contain("audio"));
        assert!(!logs_contain("still holds live allocations"));
    }

    #[traced_test]
    #[test]
    fn report_flags_leaks() {
        log_zone_report(&[snapshot("physics", 512)]);
        assert!(logs_contain("still holds live allocations"));
        assert!(logs_contain("live_bytes=512"));
    }
}
