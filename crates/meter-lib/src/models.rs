//! Core data models for the usage meter

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Body of a Prometheus instant query (`/api/v1/query`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSeriesResponse {
    pub status: String,
    #[serde(default)]
    pub data: QueryData,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricSeriesResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn samples(&self) -> &[InstantSample] {
        &self.data.result
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<InstantSample>,
}

/// One series of an instant vector: its label set and `[timestamp, "value"]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: (f64, String),
}

impl InstantSample {
    /// The raw sample value; the timestamp is not used for billing
    pub fn raw_value(&self) -> &str {
        &self.value.1
    }
}

/// The five billable resources, in query order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Memory,
    Storage,
    NetworkReceive,
    NetworkTransmit,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::Storage,
        Resource::NetworkReceive,
        Resource::NetworkTransmit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Storage => "storage",
            Resource::NetworkReceive => "network_receive",
            Resource::NetworkTransmit => "network_transmit",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Results of the five queries issued in one billing cycle
#[derive(Debug, Clone)]
pub struct UsageSeries {
    pub cpu: MetricSeriesResponse,
    pub memory: MetricSeriesResponse,
    pub storage: MetricSeriesResponse,
    pub network_receive: MetricSeriesResponse,
    pub network_transmit: MetricSeriesResponse,
}

impl UsageSeries {
    pub fn get(&self, resource: Resource) -> &MetricSeriesResponse {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Storage => &self.storage,
            Resource::NetworkReceive => &self.network_receive,
            Resource::NetworkTransmit => &self.network_transmit,
        }
    }
}

/// Per-entity usage joined from the five series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub entity_label: String,
    pub cpu_seconds: f64,
    pub memory_bytes: f64,
    pub storage_bytes: f64,
    pub net_in_bytes: f64,
    pub net_out_bytes: f64,
}

impl UsageSample {
    pub fn new(entity_label: impl Into<String>) -> Self {
        Self {
            entity_label: entity_label.into(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, resource: Resource, value: f64) {
        match resource {
            Resource::Cpu => self.cpu_seconds = value,
            Resource::Memory => self.memory_bytes = value,
            Resource::Storage => self.storage_bytes = value,
            Resource::NetworkReceive => self.net_in_bytes = value,
            Resource::NetworkTransmit => self.net_out_bytes = value,
        }
    }
}

/// Dollar amount per resource for one entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub network: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.cpu + self.memory + self.storage + self.network
    }
}

/// Billing estimate for one entity in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEstimate {
    pub entity_label: String,
    pub amount: f64,
    pub breakdown: CostBreakdown,
    pub usage: UsageSample,
}

impl fmt::Display for BillingEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "container={} cpu_seconds={:.3} memory_bytes={:.0} storage_bytes={:.0} network_bytes={:.0} amount=${:.6}",
            self.entity_label,
            self.usage.cpu_seconds,
            self.usage.memory_bytes,
            self.usage.storage_bytes,
            self.usage.net_in_bytes + self.usage.net_out_bytes,
            self.amount
        )
    }
}
