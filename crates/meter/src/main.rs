//! Usage Meter - periodic per-container billing estimates
//!
//! Polls a Prometheus-compatible backend on a fixed interval, prices each
//! container's usage against a rate table and prints one line per container.

use anyhow::Result;
use meter_lib::{
    api::{self, AppState},
    billing::{BillingEstimator, CycleReport},
    collector::{BillingLoopBuilder, PrometheusSource},
    health::{components, HealthRegistry},
    observability::{MeterMetrics, StructuredLogger},
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const METER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries billing lines only
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let config = config::MeterConfig::load()?;
    info!(instance = %config.instance_name, "Meter configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::ESTIMATOR).await;

    // Register collectors so /metrics is populated before the first cycle
    MeterMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(
        METER_VERSION,
        &config.metrics_base_url,
        config.poll_interval_secs,
    );

    let source = PrometheusSource::new(config.source_config())?;
    let (billing_loop, mut reports) = BillingLoopBuilder::new()
        .source(Arc::new(source))
        .estimator(BillingEstimator::new(config.estimator_config()))
        .health(health_registry.clone())
        .logger(logger.clone())
        .interval(config.poll_interval())
        .build()?;

    let app_state = Arc::new(AppState::new(health_registry.clone()));
    health_registry.set_ready(true).await;

    let api_handle = api::spawn_server(config.api_port, app_state);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(billing_loop.run(shutdown_rx));

    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if let Err(e) = print_report(&report) {
                warn!(error = %e, "Failed to write billing lines");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    loop_handle.await?;
    // In-flight cycles still hold a report sender; give them a moment to finish
    if tokio::time::timeout(Duration::from_secs(5), printer)
        .await
        .is_err()
    {
        warn!("Timed out waiting for in-flight cycle");
    }
    api_handle.abort();

    Ok(())
}

fn print_report(report: &CycleReport) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for estimate in &report.estimates {
        writeln!(out, "{}", estimate)?;
    }
    out.flush()
}
