//! Observability infrastructure for the usage meter
//!
//! Provides:
//! - Prometheus metrics about the meter itself (cycle latency, failures, skips)
//! - Structured logging of billing cycle events with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, Gauge, Histogram, IntCounter,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MeterMetricsInner> = OnceLock::new();

struct MeterMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_failures: IntCounter,
    cycles_skipped_overlap: IntCounter,
    entities_billed: IntCounter,
    entities_skipped: IntCounter,
    last_cycle_amount: Gauge,
}

impl MeterMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "usage_meter_cycle_latency_seconds",
                "Time spent querying the metrics backend and estimating one cycle",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_total: register_int_counter!(
                "usage_meter_cycles_total",
                "Billing cycles started"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures: register_int_counter!(
                "usage_meter_cycle_failures_total",
                "Billing cycles abandoned because a query failed"
            )
            .expect("Failed to register cycle_failures"),

            cycles_skipped_overlap: register_int_counter!(
                "usage_meter_cycles_skipped_overlap_total",
                "Ticks skipped because the previous cycle was still running"
            )
            .expect("Failed to register cycles_skipped_overlap"),

            entities_billed: register_int_counter!(
                "usage_meter_entities_billed_total",
                "Billing estimates produced"
            )
            .expect("Failed to register entities_billed"),

            entities_skipped: register_int_counter!(
                "usage_meter_entities_skipped_total",
                "Entities dropped from a cycle"
            )
            .expect("Failed to register entities_skipped"),

            last_cycle_amount: register_gauge!(
                "usage_meter_last_cycle_amount_dollars",
                "Sum of all estimates of the last completed cycle"
            )
            .expect("Failed to register last_cycle_amount"),
        }
    }
}

/// Handle to the meter's Prometheus metrics
///
/// Clones share the same global collectors.
#[derive(Clone)]
pub struct MeterMetrics {
    _private: (),
}

impl Default for MeterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MeterMetricsInner {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }

    pub fn inc_cycles_skipped_overlap(&self) {
        self.inner().cycles_skipped_overlap.inc();
    }

    /// Record the outcome of a completed cycle
    pub fn record_cycle(&self, billed: usize, skipped: usize, total_amount: f64) {
        let inner = self.inner();
        inner.entities_billed.inc_by(billed as u64);
        inner.entities_skipped.inc_by(skipped as u64);
        inner.last_cycle_amount.set(total_amount);
    }
}

/// Structured logger for billing events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, metrics_base_url: &str, interval_secs: u64) {
        info!(
            event = "meter_started",
            instance = %self.instance,
            version = %version,
            metrics_base_url = %metrics_base_url,
            interval_secs = interval_secs,
            "Usage meter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "meter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Usage meter shutting down"
        );
    }

    pub fn log_cycle_completed(&self, billed: usize, skipped: usize, total_amount: f64, elapsed_ms: u64) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            billed = billed,
            skipped = skipped,
            total_amount = total_amount,
            elapsed_ms = elapsed_ms,
            "Billing cycle complete"
        );
    }

    pub fn log_cycle_failed(&self, resource: &str, error: &str) {
        warn!(
            event = "cycle_failed",
            instance = %self.instance,
            resource = %resource,
            error = %error,
            "Billing cycle abandoned"
        );
    }

    pub fn log_cycle_skipped(&self) {
        warn!(
            event = "cycle_skipped",
            instance = %self.instance,
            "Previous billing cycle still running, skipping tick"
        );
    }

    pub fn log_entity_skipped(&self, entity: Option<&str>, reason: &str) {
        warn!(
            event = "entity_skipped",
            instance = %self.instance,
            entity = entity.unwrap_or("<unknown>"),
            reason = %reason,
            "Entity not billed this cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_metrics_handles_share_registry() {
        let metrics = MeterMetrics::new();
        let other = metrics.clone();

        metrics.observe_cycle_latency(0.2);
        metrics.inc_cycles();
        other.inc_cycle_failures();
        other.inc_cycles_skipped_overlap();
        other.record_cycle(3, 1, 0.5);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "usage_meter_cycles_total"));
    }

    #[test]
    fn test_structured_logger_instance() {
        let logger = StructuredLogger::new("meter-0");
        assert_eq!(logger.instance(), "meter-0");
    }
}
