//! Stage result evaluation.
//!
//! Applies a stage's metric conditions to the candidate version's summary
//! fields: `responseTime` against the selected statistic of the f2 time
//! summary, `errorRate` against the f2 error rate.
//!
//! A condition that evaluates false makes the stage a failure; a condition
//! that cannot be evaluated at all (unknown metric, unknown `compareWith`,
//! unparseable threshold) forces a rollback, which dominates.

use tracing::{error, info, warn};

use crate::metrics::ResultSummary;
use crate::strategy::{MetricCondition, Stage};

/// Outcome of applying every metric condition to a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEvaluation {
    /// Every evaluable condition held.
    pub success: bool,
    /// At least one condition could not be evaluated; the declared
    /// rollback version must be deployed.
    pub rollback_required: bool,
}

/// Evaluate all metric conditions of a stage against its summary.
pub fn evaluate_stage(stage: &Stage, summary: &ResultSummary) -> StageEvaluation {
    let mut success = true;
    let mut rollback_required = false;

    for condition in &stage.metric_conditions {
        match condition.name.as_str() {
            "responseTime" => {
                let actual = match condition.compare_with.as_str() {
                    "Median" => Some(summary.f2_times_summary.median),
                    "Minimum" => Some(summary.f2_times_summary.minimum),
                    "Maximum" => Some(summary.f2_times_summary.maximum),
                    other => {
                        error!(compare_with = other, "unknown compareWith value");
                        rollback_required = true;
                        None
                    }
                };
                if let Some(actual) = actual {
                    apply_condition(condition, actual, &mut success, &mut rollback_required);
                }
            }
            "errorRate" => {
                apply_condition(
                    condition,
                    summary.f2_err_rate,
                    &mut success,
                    &mut rollback_required,
                );
            }
            other => {
                warn!(metric = other, "unknown metric condition, skipping it");
                rollback_required = true;
            }
        }
    }

    StageEvaluation {
        success,
        rollback_required,
    }
}

fn apply_condition(
    condition: &MetricCondition,
    actual: f64,
    success: &mut bool,
    rollback_required: &mut bool,
) {
    match condition.is_threshold_met(actual) {
        Ok(true) => {
            info!(
                metric = %condition.name,
                statistic = %condition.compare_with,
                actual,
                threshold = %condition.threshold,
                "requirement for f2 met"
            );
        }
        Ok(false) => {
            warn!(
                metric = %condition.name,
                statistic = %condition.compare_with,
                actual,
                threshold = %condition.threshold,
                "requirement for f2 NOT met"
            );
            *success = false;
        }
        Err(e) => {
            error!(error = %e, "could not evaluate threshold");
            *rollback_required = true;
        }
    }
}
