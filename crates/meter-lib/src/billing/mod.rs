//! Billing estimation
//!
//! Joins the five usage series of a cycle per entity and prices them
//! against a linear rate table.

mod estimator;
mod join;
mod rates;

pub use estimator::{BillingEstimator, CycleReport, EstimatorConfig, ParseFailurePolicy};
pub use join::{
    join, parse_value, resolve_entity_label, FieldError, JoinMode, JoinResult, JoinedEntity,
    SkipReason, SkippedEntity, ENTITY_LABEL_KEYS,
};
pub use rates::{NetworkBillingPolicy, RateError, RateTable, BYTES_PER_GIB, SECONDS_PER_HOUR};
