//! Rate table and cost computation
//!
//! Converts raw usage quantities into dollar amounts. CPU is billed per
//! vCPU-hour of consumed CPU time, memory and storage per GiB-hour of the
//! sampled footprint, and network per GiB transferred.

use crate::models::{CostBreakdown, UsageSample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes in one GiB (2^30)
pub const BYTES_PER_GIB: f64 = 1_073_741_824.0;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    #[error("rate {name} must be a non-negative number, got {value}")]
    Invalid { name: &'static str, value: f64 },
}

/// How received and transmitted bytes are billed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkBillingPolicy {
    /// `(in + out) / GiB * network_per_gb`
    #[default]
    Combined,
    /// `in / GiB * receive rate + out / GiB * transmit rate`
    Separate,
}

/// Per-resource prices in dollars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// Dollars per vCPU-hour
    pub cpu_per_vcpu_hour: f64,
    /// Dollars per GiB-hour of memory
    pub memory_per_gb_hour: f64,
    /// Dollars per GiB-hour of filesystem usage
    pub storage_per_gb_hour: f64,
    /// Dollars per GiB transferred, used by `NetworkBillingPolicy::Combined`
    pub network_per_gb: f64,
    /// Dollars per GiB received, used by `NetworkBillingPolicy::Separate`
    pub network_receive_per_gb: f64,
    /// Dollars per GiB transmitted, used by `NetworkBillingPolicy::Separate`
    pub network_transmit_per_gb: f64,
    pub network_policy: NetworkBillingPolicy,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            cpu_per_vcpu_hour: 0.02,
            memory_per_gb_hour: 0.01,
            storage_per_gb_hour: 0.005,
            network_per_gb: 0.001,
            network_receive_per_gb: 0.001,
            network_transmit_per_gb: 0.001,
            network_policy: NetworkBillingPolicy::Combined,
        }
    }
}

impl RateTable {
    /// Price a usage sample, one sub-total per resource
    pub fn cost(&self, usage: &UsageSample) -> CostBreakdown {
        let network = match self.network_policy {
            NetworkBillingPolicy::Combined => {
                (usage.net_in_bytes + usage.net_out_bytes) / BYTES_PER_GIB * self.network_per_gb
            }
            NetworkBillingPolicy::Separate => {
                usage.net_in_bytes / BYTES_PER_GIB * self.network_receive_per_gb
                    + usage.net_out_bytes / BYTES_PER_GIB * self.network_transmit_per_gb
            }
        };

        CostBreakdown {
            cpu: usage.cpu_seconds / SECONDS_PER_HOUR * self.cpu_per_vcpu_hour,
            memory: usage.memory_bytes / BYTES_PER_GIB * self.memory_per_gb_hour,
            storage: usage.storage_bytes / BYTES_PER_GIB * self.storage_per_gb_hour,
            network,
        }
    }

    /// Reject negative or non-finite prices
    pub fn validate(&self) -> Result<(), RateError> {
        let rates = [
            ("cpu_per_vcpu_hour", self.cpu_per_vcpu_hour),
            ("memory_per_gb_hour", self.memory_per_gb_hour),
            ("storage_per_gb_hour", self.storage_per_gb_hour),
            ("network_per_gb", self.network_per_gb),
            ("network_receive_per_gb", self.network_receive_per_gb),
            ("network_transmit_per_gb", self.network_transmit_per_gb),
        ];

        for (name, rate) in rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(RateError::Invalid { name, value: rate });
            }
        }

        Ok(())
    }
}
