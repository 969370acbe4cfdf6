//! # Minne Telemetry
//!
//! Crate for logging setup, zone reports and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{log_zone_report, Logger};
pub use metrics::MetricsRecorder;
