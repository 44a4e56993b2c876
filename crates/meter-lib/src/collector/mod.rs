//! Usage collection from a metrics backend
//!
//! One billing cycle issues five instant queries, one per billable
//! resource, in a fixed order. The first failed query abandons the cycle;
//! there is no partial result and no retry.

mod source;
mod r#loop;

#[cfg(test)]
mod tests;

pub use source::{PrometheusSource, QueryError, QuerySet, SourceConfig};
pub use r#loop::{BillingLoop, BillingLoopBuilder, LoopConfig, UNHEALTHY_AFTER_FAILURES};

use crate::models::{MetricSeriesResponse, Resource, UsageSeries};

pub use async_trait::async_trait;

/// Source of instant-query results
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run the instant query for one resource
    async fn query(&self, resource: Resource) -> Result<MetricSeriesResponse, QueryError>;

    /// Run all five queries, stopping at the first failure
    async fn collect(&self) -> Result<UsageSeries, QueryError> {
        Ok(UsageSeries {
            cpu: self.query(Resource::Cpu).await?,
            memory: self.query(Resource::Memory).await?,
            storage: self.query(Resource::Storage).await?,
            network_receive: self.query(Resource::NetworkReceive).await?,
            network_transmit: self.query(Resource::NetworkTransmit).await?,
        })
    }
}
