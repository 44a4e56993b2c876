//! Joining the five query results into per-entity usage
//!
//! The CPU series defines which entities are billed and in which order.
//! By default the other series are matched by resolved entity label;
//! positional matching is available for backends known to return every
//! series in the same order.

use crate::models::{InstantSample, MetricSeriesResponse, Resource, UsageSample, UsageSeries};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Label keys identifying an entity, in priority order
pub const ENTITY_LABEL_KEYS: [&str; 3] = ["container", "container_name", "id"];

/// How samples from different series are matched to one entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Match by resolved entity label, summing duplicate series per label
    #[default]
    ByLabel,
    /// Match by index, truncated to the shortest result sequence
    Positional,
}

/// A sample value that could not be turned into a usage quantity
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("{resource} value {raw:?} is not a number")]
    Unparseable { resource: Resource, raw: String },

    #[error("{resource} value {raw:?} is not finite")]
    NonFinite { resource: Resource, raw: String },
}

/// Why an entity produced no estimate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("no recognizable entity label, available labels: {available:?}")]
    MissingLabel { available: Vec<String> },

    #[error("no {resource} sample for entity")]
    MissingSeries { resource: Resource },

    #[error("{} unusable value(s): {}", .errors.len(), join_errors(.errors))]
    InvalidValues { errors: Vec<FieldError> },
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntity {
    /// `None` when the label itself could not be resolved
    pub entity_label: Option<String>,
    pub reason: SkipReason,
}

/// Usage for one entity; fields that failed to parse are left at zero and
/// listed in `errors`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedEntity {
    pub usage: UsageSample,
    pub errors: Vec<FieldError>,
}

pub type JoinResult = Result<JoinedEntity, SkippedEntity>;

/// Resolve the entity label of a sample's label set
///
/// The first key present wins. An empty value (cAdvisor reports
/// `container=""` for pod and root cgroups) leaves the sample unresolved.
pub fn resolve_entity_label(metric: &HashMap<String, String>) -> Option<&str> {
    ENTITY_LABEL_KEYS
        .iter()
        .find_map(|key| metric.get(*key))
        .map(String::as_str)
        .filter(|label| !label.is_empty())
}

/// Parse a raw sample value
pub fn parse_value(resource: Resource, raw: &str) -> Result<f64, FieldError> {
    let value: f64 = raw.parse().map_err(|_| FieldError::Unparseable {
        resource,
        raw: raw.to_string(),
    })?;

    if !value.is_finite() {
        return Err(FieldError::NonFinite {
            resource,
            raw: raw.to_string(),
        });
    }

    Ok(value)
}

/// Join the five series into per-entity usage
pub fn join(series: &UsageSeries, mode: JoinMode) -> Vec<JoinResult> {
    match mode {
        JoinMode::ByLabel => join_by_label(series),
        JoinMode::Positional => join_positional(series),
    }
}

fn missing_label(sample: &InstantSample) -> SkippedEntity {
    let mut available: Vec<String> = sample.metric.keys().cloned().collect();
    available.sort();
    SkippedEntity {
        entity_label: None,
        reason: SkipReason::MissingLabel { available },
    }
}

/// Sum of all samples sharing a label within one series
#[derive(Debug, Default)]
struct LabelTotal {
    total: f64,
    errors: Vec<FieldError>,
}

fn index_by_label(resource: Resource, response: &MetricSeriesResponse) -> HashMap<&str, LabelTotal> {
    let mut index: HashMap<&str, LabelTotal> = HashMap::new();

    for sample in response.samples() {
        let Some(label) = resolve_entity_label(&sample.metric) else {
            continue;
        };

        let entry = index.entry(label).or_default();
        match parse_value(resource, sample.raw_value()) {
            Ok(value) => entry.total += value,
            Err(e) => entry.errors.push(e),
        }
    }

    index
}

fn join_by_label(series: &UsageSeries) -> Vec<JoinResult> {
    let indexes: Vec<(Resource, HashMap<&str, LabelTotal>)> = Resource::ALL
        .iter()
        .map(|&resource| (resource, index_by_label(resource, series.get(resource))))
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut results = Vec::new();

    for sample in series.cpu.samples() {
        let Some(label) = resolve_entity_label(&sample.metric) else {
            results.push(Err(missing_label(sample)));
            continue;
        };

        // Duplicate CPU series for one label were already summed
        if !seen.insert(label) {
            continue;
        }

        let mut usage = UsageSample::new(label);
        let mut errors = Vec::new();
        let mut missing = None;

        for (resource, index) in &indexes {
            match index.get(label) {
                Some(found) => {
                    usage.set(*resource, found.total);
                    errors.extend(found.errors.iter().cloned());
                }
                None => {
                    missing = Some(*resource);
                    break;
                }
            }
        }

        results.push(match missing {
            Some(resource) => Err(SkippedEntity {
                entity_label: Some(label.to_string()),
                reason: SkipReason::MissingSeries { resource },
            }),
            None => Ok(JoinedEntity { usage, errors }),
        });
    }

    results
}

fn join_positional(series: &UsageSeries) -> Vec<JoinResult> {
    let len = Resource::ALL
        .iter()
        .map(|&resource| series.get(resource).samples().len())
        .min()
        .unwrap_or(0);

    let mut results = Vec::with_capacity(len);

    for (i, sample) in series.cpu.samples().iter().take(len).enumerate() {
        let Some(label) = resolve_entity_label(&sample.metric) else {
            results.push(Err(missing_label(sample)));
            continue;
        };

        let mut usage = UsageSample::new(label);
        let mut errors = Vec::new();

        for resource in Resource::ALL {
            let raw = series.get(resource).samples()[i].raw_value();
            match parse_value(resource, raw) {
                Ok(value) => usage.set(resource, value),
                Err(e) => errors.push(e),
            }
        }

        results.push(Ok(JoinedEntity { usage, errors }));
    }

    results
}
