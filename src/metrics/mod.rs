//! Prometheus metrics for the acquisition layer
//!
//! Exposes metrics at /metrics endpoint in Prometheus format:
//! - Read counts and latency per domain
//! - Error counts by kind
//! - Discarded stale results and skipped poll ticks
//! - Write outcomes
//! - Auto-refresh state per domain

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;
use tracing::info;

use crate::modbus::Domain;

/// Initialize Prometheus metrics exporter
/// Returns a handle to render metrics
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    info!("Prometheus metrics initialized");
    Ok(handle)
}

/// Metrics for one gateway read
pub struct ReadMetrics {
    start: Instant,
    domain: Domain,
}

impl ReadMetrics {
    /// Start timing a read
    pub fn start(domain: Domain) -> Self {
        Self {
            start: Instant::now(),
            domain,
        }
    }

    /// Record successful read of `points` addresses
    pub fn success(self, points: usize) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            "modbus_monitor_reads_total",
            "domain" => self.domain.as_str(),
            "status" => "success"
        )
        .increment(1);

        counter!(
            "modbus_monitor_points_read_total",
            "domain" => self.domain.as_str()
        )
        .increment(points as u64);

        histogram!(
            "modbus_monitor_read_duration_seconds",
            "domain" => self.domain.as_str()
        )
        .record(duration);
    }

    /// Record failed read
    pub fn failure(self, error_kind: &'static str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            "modbus_monitor_reads_total",
            "domain" => self.domain.as_str(),
            "status" => "error"
        )
        .increment(1);

        counter!(
            "modbus_monitor_errors_total",
            "domain" => self.domain.as_str(),
            "type" => error_kind
        )
        .increment(1);

        // Still record the latency
        histogram!(
            "modbus_monitor_read_duration_seconds",
            "domain" => self.domain.as_str()
        )
        .record(duration);
    }
}

/// Record a result discarded because a newer request already landed
pub fn record_stale_result(domain: Domain) {
    counter!(
        "modbus_monitor_stale_results_total",
        "domain" => domain.as_str()
    )
    .increment(1);
}

/// Record a poll tick that did not issue a fetch
pub fn record_skipped_tick(domain: Domain, reason: &'static str) {
    counter!(
        "modbus_monitor_skipped_ticks_total",
        "domain" => domain.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// Record auto-refresh state
pub fn record_polling_enabled(domain: Domain, enabled: bool) {
    gauge!(
        "modbus_monitor_polling_enabled",
        "domain" => domain.as_str()
    )
    .set(if enabled { 1.0 } else { 0.0 });
}

/// Record a write outcome; `status` is "success" or an error kind
pub fn record_write(status: &'static str) {
    counter!("modbus_monitor_writes_total", "status" => status).increment(1);
}
