//! Instant-query client for a Prometheus-compatible backend

use super::MetricsSource;
use crate::models::{MetricSeriesResponse, Resource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Path of the instant query endpoint, relative to the base URL
const QUERY_PATH: &str = "api/v1/query";

/// Failure of one instant query; any variant skips the whole cycle
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{resource} query failed: {source}")]
    Transport {
        resource: Resource,
        #[source]
        source: reqwest::Error,
    },

    #[error("{resource} query returned HTTP {status}: {body}")]
    Status {
        resource: Resource,
        status: u16,
        body: String,
    },

    #[error("{resource} query returned malformed JSON: {source}")]
    Decode {
        resource: Resource,
        #[source]
        source: serde_json::Error,
    },

    #[error("{resource} query reported status {status:?}: {message}")]
    Backend {
        resource: Resource,
        status: String,
        message: String,
    },
}

impl QueryError {
    pub fn resource(&self) -> Resource {
        match self {
            QueryError::Transport { resource, .. }
            | QueryError::Status { resource, .. }
            | QueryError::Decode { resource, .. }
            | QueryError::Backend { resource, .. } => *resource,
        }
    }
}

/// PromQL expression issued for each resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet {
    pub cpu: String,
    pub memory: String,
    pub storage: String,
    pub network_receive: String,
    pub network_transmit: String,
}

impl Default for QuerySet {
    fn default() -> Self {
        Self {
            cpu: "container_cpu_usage_seconds_total".to_string(),
            memory: "container_memory_usage_bytes".to_string(),
            storage: "container_fs_usage_bytes".to_string(),
            network_receive: "container_network_receive_bytes_total".to_string(),
            network_transmit: "container_network_transmit_bytes_total".to_string(),
        }
    }
}

impl QuerySet {
    pub fn expr(&self, resource: Resource) -> &str {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Storage => &self.storage,
            Resource::NetworkReceive => &self.network_receive,
            Resource::NetworkTransmit => &self.network_transmit,
        }
    }
}

/// Configuration for the metrics backend client
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Backend base URL (e.g., "http://localhost:9090")
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub queries: QuerySet,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout: Duration::from_secs(30),
            queries: QuerySet::default(),
        }
    }
}

/// HTTP client issuing instant queries
pub struct PrometheusSource {
    client: Client,
    query_url: Url,
    queries: QuerySet,
}

impl PrometheusSource {
    /// Create a new client
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let query_url = query_url(&config.base_url)?;

        Ok(Self {
            client,
            query_url,
            queries: config.queries,
        })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

/// Resolve `<base>/api/v1/query`, keeping any path prefix on the base
fn query_url(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url).context("Invalid metrics base URL")?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(QUERY_PATH).context("Invalid metrics base URL")
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, resource: Resource) -> Result<MetricSeriesResponse, QueryError> {
        let expr = self.queries.expr(resource);
        debug!(resource = %resource, query = %expr, "Issuing instant query");

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", expr)])
            .send()
            .await
            .map_err(|source| QueryError::Transport { resource, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| QueryError::Transport { resource, source })?;

        if !status.is_success() {
            return Err(QueryError::Status {
                resource,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MetricSeriesResponse = serde_json::from_str(&body)
            .map_err(|source| QueryError::Decode { resource, source })?;

        if !parsed.is_success() {
            return Err(QueryError::Backend {
                resource,
                message: parsed.error.clone().unwrap_or_default(),
                status: parsed.status,
            });
        }

        Ok(parsed)
    }
}
