//! Meter configuration
//!
//! Read from an optional file named by `METER_CONFIG_FILE`, overridden by
//! `METER_*` environment variables. Every field has a default.

use anyhow::{Context, Result};
use meter_lib::billing::{
    EstimatorConfig, JoinMode, NetworkBillingPolicy, ParseFailurePolicy, RateTable,
};
use meter_lib::collector::{LoopConfig, QuerySet, SourceConfig};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "METER_CONFIG_FILE";

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Metrics backend base URL
    #[serde(default = "default_metrics_base_url")]
    pub metrics_base_url: String,

    /// Seconds between billing cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-query HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_cpu_query")]
    pub cpu_query: String,
    #[serde(default = "default_memory_query")]
    pub memory_query: String,
    #[serde(default = "default_storage_query")]
    pub storage_query: String,
    #[serde(default = "default_network_receive_query")]
    pub network_receive_query: String,
    #[serde(default = "default_network_transmit_query")]
    pub network_transmit_query: String,

    #[serde(default = "default_cpu_rate")]
    pub cpu_per_vcpu_hour: f64,
    #[serde(default = "default_memory_rate")]
    pub memory_per_gb_hour: f64,
    #[serde(default = "default_storage_rate")]
    pub storage_per_gb_hour: f64,
    #[serde(default = "default_network_rate")]
    pub network_per_gb: f64,
    #[serde(default = "default_network_rate")]
    pub network_receive_per_gb: f64,
    #[serde(default = "default_network_rate")]
    pub network_transmit_per_gb: f64,

    /// `combined` or `separate`
    #[serde(default)]
    pub network_policy: NetworkBillingPolicy,

    /// `by_label` or `positional`
    #[serde(default)]
    pub join_mode: JoinMode,

    /// `skip` or `zero_fill`
    #[serde(default)]
    pub parse_failure_policy: ParseFailurePolicy,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "usage-meter".to_string())
}

fn default_metrics_base_url() -> String {
    SourceConfig::default().base_url
}

fn default_poll_interval() -> u64 {
    LoopConfig::default().interval.as_secs()
}

fn default_http_timeout() -> u64 {
    SourceConfig::default().timeout.as_secs()
}

fn default_api_port() -> u16 {
    8080
}

fn default_cpu_query() -> String {
    QuerySet::default().cpu
}

fn default_memory_query() -> String {
    QuerySet::default().memory
}

fn default_storage_query() -> String {
    QuerySet::default().storage
}

fn default_network_receive_query() -> String {
    QuerySet::default().network_receive
}

fn default_network_transmit_query() -> String {
    QuerySet::default().network_transmit
}

fn default_cpu_rate() -> f64 {
    RateTable::default().cpu_per_vcpu_hour
}

fn default_memory_rate() -> f64 {
    RateTable::default().memory_per_gb_hour
}

fn default_storage_rate() -> f64 {
    RateTable::default().storage_per_gb_hour
}

fn default_network_rate() -> f64 {
    RateTable::default().network_per_gb
}

impl MeterConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("METER").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let config: MeterConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be greater than zero");
        }
        self.rate_table().validate()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rate_table(&self) -> RateTable {
        RateTable {
            cpu_per_vcpu_hour: self.cpu_per_vcpu_hour,
            memory_per_gb_hour: self.memory_per_gb_hour,
            storage_per_gb_hour: self.storage_per_gb_hour,
            network_per_gb: self.network_per_gb,
            network_receive_per_gb: self.network_receive_per_gb,
            network_transmit_per_gb: self.network_transmit_per_gb,
            network_policy: self.network_policy,
        }
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            rates: self.rate_table(),
            join_mode: self.join_mode,
            parse_failure_policy: self.parse_failure_policy,
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            base_url: self.metrics_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            queries: QuerySet {
                cpu: self.cpu_query.clone(),
                memory: self.memory_query.clone(),
                storage: self.storage_query.clone(),
                network_receive: self.network_receive_query.clone(),
                network_transmit: self.network_transmit_query.clone(),
            },
        }
    }
}
