//! Billing estimator
//!
//! Turns the five query results of one cycle into per-entity estimates.
//! Stateless: every call starts from scratch.

use super::join::{join, JoinMode, SkipReason, SkippedEntity};
use super::rates::RateTable;
use crate::models::{BillingEstimate, UsageSample, UsageSeries};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What to do with an entity that has unparseable values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailurePolicy {
    /// Drop the entity from this cycle and report its field errors
    #[default]
    Skip,
    /// Treat unusable fields as zero and bill the rest
    ZeroFill,
}

/// Estimator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub rates: RateTable,
    pub join_mode: JoinMode,
    pub parse_failure_policy: ParseFailurePolicy,
}

/// Outcome of estimating one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub estimates: Vec<BillingEstimate>,
    pub skipped: Vec<SkippedEntity>,
}

impl CycleReport {
    pub fn total_amount(&self) -> f64 {
        self.estimates.iter().map(|e| e.amount).sum()
    }
}

/// Computes billing estimates from joined usage
#[derive(Debug, Clone, Default)]
pub struct BillingEstimator {
    config: EstimatorConfig,
}

impl BillingEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Price a single usage sample
    pub fn price(&self, usage: UsageSample) -> BillingEstimate {
        let breakdown = self.config.rates.cost(&usage);
        BillingEstimate {
            entity_label: usage.entity_label.clone(),
            amount: breakdown.total(),
            breakdown,
            usage,
        }
    }

    /// Estimate every entity found in the CPU series
    pub fn estimate(&self, series: &UsageSeries) -> CycleReport {
        let mut report = CycleReport::default();

        for joined in join(series, self.config.join_mode) {
            let entity = match joined {
                Ok(entity) => entity,
                Err(skipped) => {
                    debug!(
                        entity = ?skipped.entity_label,
                        reason = %skipped.reason,
                        "Skipping entity"
                    );
                    report.skipped.push(skipped);
                    continue;
                }
            };

            if !entity.errors.is_empty() {
                match self.config.parse_failure_policy {
                    ParseFailurePolicy::Skip => {
                        report.skipped.push(SkippedEntity {
                            entity_label: Some(entity.usage.entity_label),
                            reason: SkipReason::InvalidValues {
                                errors: entity.errors,
                            },
                        });
                        continue;
                    }
                    ParseFailurePolicy::ZeroFill => {
                        for error in &entity.errors {
                            warn!(
                                entity = %entity.usage.entity_label,
                                error = %error,
                                "Treating unusable value as zero"
                            );
                        }
                    }
                }
            }

            report.estimates.push(self.price(entity.usage));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::rates::BYTES_PER_GIB;
    use crate::models::{InstantSample, MetricSeriesResponse, QueryData, Resource};
    use std::collections::HashMap;

    fn response(samples: Vec<(Vec<(&str, &str)>, String)>) -> MetricSeriesResponse {
        MetricSeriesResponse {
            status: "success".to_string(),
            data: QueryData {
                result_type: "vector".to_string(),
                result: samples
                    .into_iter()
                    .map(|(metric, value)| InstantSample {
                        metric: metric
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect::<HashMap<_, _>>(),
                        value: (1_700_000_000.0, value),
                    })
                    .collect(),
            },
            error_type: None,
            error: None,
        }
    }

    fn single(label: &str, value: f64) -> MetricSeriesResponse {
        response(vec![(vec![("container", label)], value.to_string())])
    }

    fn series_for(label: &str, cpu: f64, mem: f64, storage: f64, net_in: f64, net_out: f64) -> UsageSeries {
        UsageSeries {
            cpu: single(label, cpu),
            memory: single(label, mem),
            storage: single(label, storage),
            network_receive: single(label, net_in),
            network_transmit: single(label, net_out),
        }
    }

    #[test]
    fn test_reference_example() {
        let series = series_for(
            "web",
            3600.0,
            BYTES_PER_GIB,
            BYTES_PER_GIB,
            BYTES_PER_GIB / 2.0,
            BYTES_PER_GIB / 2.0,
        );

        let report = BillingEstimator::default().estimate(&series);

        assert_eq!(report.estimates.len(), 1);
        assert!(report.skipped.is_empty());
        let estimate = &report.estimates[0];
        assert_eq!(estimate.entity_label, "web");
        assert!((estimate.amount - 0.036).abs() < 1e-12);
        assert!((report.total_amount() - 0.036).abs() < 1e-12);
    }

    #[test]
    fn test_amount_is_sum_of_breakdown() {
        let series = series_for("db", 7200.0, 3.0 * BYTES_PER_GIB, 10.0 * BYTES_PER_GIB, 1e6, 2e6);
        let estimate = BillingEstimator::default().estimate(&series).estimates.remove(0);
        assert_eq!(estimate.amount, estimate.breakdown.total());
        assert!((estimate.breakdown.cpu - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_unlabeled_entity_skipped_others_billed() {
        let cpu = response(vec![
            (vec![("image", "nginx")], "10".to_string()),
            (vec![("container_name", "api")], "3600".to_string()),
        ]);
        let rest = response(vec![(vec![("container_name", "api")], "0".to_string())]);
        let series = UsageSeries {
            cpu,
            memory: rest.clone(),
            storage: rest.clone(),
            network_receive: rest.clone(),
            network_transmit: rest,
        };

        let report = BillingEstimator::default().estimate(&series);

        assert_eq!(report.estimates.len(), 1);
        assert_eq!(report.estimates[0].entity_label, "api");
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(report.skipped[0].reason, SkipReason::MissingLabel { .. }));
    }

    #[test]
    fn test_parse_failure_skip_policy() {
        let mut series = series_for("web", 3600.0, 1.0, 1.0, 1.0, 1.0);
        series.memory = response(vec![(vec![("container", "web")], "not-a-number".to_string())]);

        let report = BillingEstimator::default().estimate(&series);

        assert!(report.estimates.is_empty());
        match &report.skipped[0].reason {
            SkipReason::InvalidValues { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("memory"));
            }
            other => panic!("unexpected reason: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failure_zero_fill_policy() {
        let mut series = series_for("web", 3600.0, BYTES_PER_GIB, 0.0, 0.0, 0.0);
        series.memory = response(vec![(vec![("container", "web")], "garbage".to_string())]);

        let estimator = BillingEstimator::new(EstimatorConfig {
            parse_failure_policy: ParseFailurePolicy::ZeroFill,
            ..EstimatorConfig::default()
        });
        let report = estimator.estimate(&series);

        assert!(report.skipped.is_empty());
        assert_eq!(report.estimates[0].usage.memory_bytes, 0.0);
        assert!((report.estimates[0].amount - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_unequal_lengths_do_not_panic() {
        let mut series = series_for("a", 1.0, 1.0, 1.0, 1.0, 1.0);
        series.cpu = response(vec![
            (vec![("container", "a")], "1".to_string()),
            (vec![("container", "b")], "1".to_string()),
        ]);

        for join_mode in [JoinMode::ByLabel, JoinMode::Positional] {
            let estimator = BillingEstimator::new(EstimatorConfig {
                join_mode,
                ..EstimatorConfig::default()
            });
            let report = estimator.estimate(&series);
            assert_eq!(report.estimates.len(), 1);
            assert_eq!(report.estimates[0].entity_label, "a");
        }
    }

    #[test]
    fn test_missing_series_reports_resource() {
        let mut series = series_for("a", 1.0, 1.0, 1.0, 1.0, 1.0);
        series.network_transmit = response(vec![]);

        let report = BillingEstimator::default().estimate(&series);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::MissingSeries {
                resource: Resource::NetworkTransmit
            }
        );
    }
}
