//! Container usage metering and lifecycle helpers
//!
//! This crate provides:
//! - Usage collection from a Prometheus-compatible backend
//! - Per-container billing estimates from a linear rate table
//! - A scheduled billing loop with an overlap guard
//! - Container start/stop/duplicate against the Docker Engine API
//! - Health checks and observability

pub mod api;
pub mod billing;
pub mod collector;
pub mod health;
pub mod models;
pub mod observability;
pub mod runtime;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MeterMetrics, StructuredLogger};
