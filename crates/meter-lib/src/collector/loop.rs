//! Billing loop
//!
//! Fires a collect-estimate cycle on a fixed interval. Each cycle holds an
//! owned guard for its whole duration; a tick that finds the guard taken
//! is skipped rather than queued.

use super::{MetricsSource, QueryError};
use crate::billing::{BillingEstimator, CycleReport};
use crate::health::{components, HealthRegistry};
use crate::observability::{MeterMetrics, StructuredLogger};
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedMutexGuard};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive failed cycles before the collector is reported unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Configuration for the billing loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Time between cycles (default: 60 seconds)
    pub interval: Duration,
    /// Channel buffer size for cycle reports
    pub buffer_size: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            buffer_size: 16,
        }
    }
}

/// Everything one cycle needs, shared with the spawned cycle tasks
struct CycleRunner {
    source: Arc<dyn MetricsSource>,
    estimator: BillingEstimator,
    report_tx: mpsc::Sender<CycleReport>,
    health: HealthRegistry,
    metrics: MeterMetrics,
    logger: StructuredLogger,
    consecutive_failures: AtomicU32,
}

impl CycleRunner {
    async fn run_cycle(&self) -> Result<CycleReport, QueryError> {
        let start = Instant::now();
        self.metrics.inc_cycles();

        let series = match self.source.collect().await {
            Ok(series) => series,
            Err(e) => {
                self.metrics.inc_cycle_failures();
                self.logger
                    .log_cycle_failed(e.resource().as_str(), &e.to_string());

                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= UNHEALTHY_AFTER_FAILURES {
                    self.health
                        .set_unhealthy(
                            components::COLLECTOR,
                            format!("{} consecutive cycles failed, last: {}", failures, e),
                        )
                        .await;
                } else {
                    self.health
                        .set_degraded(components::COLLECTOR, e.to_string())
                        .await;
                }
                return Err(e);
            }
        };
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.health.set_healthy(components::COLLECTOR).await;

        let report = self.estimator.estimate(&series);

        for skipped in &report.skipped {
            self.logger
                .log_entity_skipped(skipped.entity_label.as_deref(), &skipped.reason.to_string());
        }

        let elapsed = start.elapsed();
        let total = report.total_amount();
        self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
        self.metrics
            .record_cycle(report.estimates.len(), report.skipped.len(), total);
        self.logger.log_cycle_completed(
            report.estimates.len(),
            report.skipped.len(),
            total,
            elapsed.as_millis() as u64,
        );

        if report.estimates.is_empty() && !report.skipped.is_empty() {
            self.health
                .set_degraded(components::ESTIMATOR, "every entity was skipped")
                .await;
        } else {
            self.health.set_healthy(components::ESTIMATOR).await;
        }

        if let Err(e) = self.report_tx.send(report.clone()).await {
            warn!(error = %e, "Failed to send cycle report to channel");
        }

        Ok(report)
    }
}

/// Periodic collect-and-estimate loop
pub struct BillingLoop {
    runner: Arc<CycleRunner>,
    config: LoopConfig,
    cycle_guard: Arc<Mutex<()>>,
}

impl BillingLoop {
    /// Create a new billing loop and the receiver for its reports
    pub fn new(
        source: Arc<dyn MetricsSource>,
        estimator: BillingEstimator,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: LoopConfig,
    ) -> (Self, mpsc::Receiver<CycleReport>) {
        let (report_tx, report_rx) = mpsc::channel(config.buffer_size);

        let runner = Arc::new(CycleRunner {
            source,
            estimator,
            report_tx,
            health,
            metrics: MeterMetrics::new(),
            logger,
            consecutive_failures: AtomicU32::new(0),
        });

        let billing_loop = Self {
            runner,
            config,
            cycle_guard: Arc::new(Mutex::new(())),
        };

        (billing_loop, report_rx)
    }

    /// Take the cycle guard, or `None` if a cycle is still running
    pub fn try_begin_cycle(&self) -> Option<OwnedMutexGuard<()>> {
        self.cycle_guard.clone().try_lock_owned().ok()
    }

    /// Run one cycle immediately, unless another one holds the guard
    ///
    /// Returns `None` when the cycle was skipped.
    pub async fn run_once(&self) -> Option<Result<CycleReport, QueryError>> {
        let _guard = self.try_begin_cycle()?;
        Some(self.runner.run_cycle().await)
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting billing loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(guard) = self.try_begin_cycle() else {
                        self.runner.metrics.inc_cycles_skipped_overlap();
                        self.runner.logger.log_cycle_skipped();
                        continue;
                    };

                    let runner = self.runner.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = runner.run_cycle().await {
                            debug!(error = %e, "Cycle ended without estimates");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("Shutting down billing loop");
                    break;
                }
            }
        }
    }
}

/// Builder for the billing loop
pub struct BillingLoopBuilder {
    source: Option<Arc<dyn MetricsSource>>,
    estimator: BillingEstimator,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: LoopConfig,
}

impl BillingLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            estimator: BillingEstimator::default(),
            health: None,
            logger: None,
            config: LoopConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn estimator(mut self, estimator: BillingEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn build(self) -> Result<(BillingLoop, mpsc::Receiver<CycleReport>)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Billing interval must be greater than zero");
        }

        Ok(BillingLoop::new(
            source,
            self.estimator,
            self.health.unwrap_or_default(),
            self.logger
                .unwrap_or_else(|| StructuredLogger::new("usage-meter")),
            self.config,
        ))
    }
}

impl Default for BillingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::{MetricSeriesResponse, Resource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Semaphore;

    fn empty_response() -> MetricSeriesResponse {
        serde_json::from_str(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#).unwrap()
    }

    struct EmptySource;

    #[async_trait]
    impl MetricsSource for EmptySource {
        async fn query(&self, _resource: Resource) -> Result<MetricSeriesResponse, QueryError> {
            Ok(empty_response())
        }
    }

    /// Blocks every CPU query until permits are added
    struct GatedSource {
        gate: Semaphore,
        cpu_queries: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSource for GatedSource {
        async fn query(&self, resource: Resource) -> Result<MetricSeriesResponse, QueryError> {
            if resource == Resource::Cpu {
                self.cpu_queries.fetch_add(1, Ordering::SeqCst);
                let _permit = self.gate.acquire().await.unwrap();
            }
            Ok(empty_response())
        }
    }

    /// Answers 503 while `failing` is set
    struct FlakySource {
        failing: AtomicBool,
    }

    #[async_trait]
    impl MetricsSource for FlakySource {
        async fn query(&self, resource: Resource) -> Result<MetricSeriesResponse, QueryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(QueryError::Status {
                    resource,
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(empty_response())
        }
    }

    fn skipped_overlap_total() -> f64 {
        prometheus::gather()
            .iter()
            .find(|f| f.get_name() == "usage_meter_cycles_skipped_overlap_total")
            .map(|f| f.get_metric()[0].get_counter().get_value())
            .unwrap_or(0.0)
    }

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_builder_requires_source() {
        assert!(BillingLoopBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_interval() {
        let result = BillingLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let (billing_loop, _rx) = BillingLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .build()
            .unwrap();

        let held = billing_loop.try_begin_cycle().expect("guard should be free");
        assert!(billing_loop.try_begin_cycle().is_none());
        assert!(billing_loop.run_once().await.is_none());

        drop(held);
        assert!(billing_loop.run_once().await.is_some());
    }

    #[tokio::test]
    async fn test_run_skips_ticks_while_cycle_in_flight() {
        let source = Arc::new(GatedSource {
            gate: Semaphore::new(0),
            cpu_queries: AtomicUsize::new(0),
        });
        let (billing_loop, mut rx) = BillingLoopBuilder::new()
            .source(source.clone())
            .interval(Duration::from_millis(20))
            .build()
            .unwrap();
        let skipped_before = skipped_overlap_total();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(billing_loop.run(shutdown_rx));

        // Roughly ten ticks fire while the first cycle is blocked
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(source.cpu_queries.load(Ordering::SeqCst), 1);
        assert!(skipped_overlap_total() > skipped_before);

        source.gate.add_permits(1);
        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("released cycle should report")
            .unwrap();
        assert!(report.estimates.is_empty());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_repeated_failures_mark_collector_unhealthy() {
        let source = Arc::new(FlakySource {
            failing: AtomicBool::new(true),
        });
        let health = HealthRegistry::new();
        let (billing_loop, _rx) = BillingLoopBuilder::new()
            .source(source.clone())
            .health(health.clone())
            .build()
            .unwrap();

        for _ in 1..UNHEALTHY_AFTER_FAILURES {
            assert!(billing_loop.run_once().await.unwrap().is_err());
            assert_eq!(health.health().await.status, ComponentStatus::Degraded);
        }

        assert!(billing_loop.run_once().await.unwrap().is_err());
        let status = health.health().await;
        assert_eq!(status.status, ComponentStatus::Unhealthy);
        assert!(status.components[components::COLLECTOR]
            .message
            .as_deref()
            .unwrap()
            .contains("3 consecutive cycles failed"));

        source.failing.store(false, Ordering::SeqCst);
        assert!(billing_loop.run_once().await.unwrap().is_ok());
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (billing_loop, _rx) = BillingLoopBuilder::new()
            .source(Arc::new(EmptySource))
            .interval(Duration::from_secs(3600))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(billing_loop.run(shutdown_rx));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .unwrap();
    }
}
