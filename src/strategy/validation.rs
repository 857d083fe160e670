//! Strategy validation engine.
//!
//! ## Responsibility
//! Validate the load-time invariants of a parsed [`ReleaseStrategy`]:
//! traffic splits, end-action references, threshold expressions,
//! `compareWith` values, and the rollback version name.
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Every error message names the offending stage and field
//!
//! ## NOT Responsible For
//! - Parsing YAML (that belongs to `loader`)
//! - Evaluating conditions at run time (that belongs to `release`)

use std::collections::HashSet;

use super::{threshold::ThresholdExpr, ReleaseStrategy};

/// Errors arising from strategy parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// YAML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// One or more load-time invariants failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A stage field has an invalid value.
    #[error("Stage '{stage}': field '{field}' has invalid value '{value}': {reason}")]
    InvalidField {
        stage: String,
        field: String,
        value: String,
        reason: String,
    },

    /// A symbolic version name did not resolve within a function.
    #[error("version '{version}' not found in function '{function}'")]
    UnknownVersion { version: String, function: String },

    /// A threshold expression did not parse.
    #[error("invalid threshold '{expr}': {reason}")]
    Threshold { expr: String, reason: String },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

const COMPARE_WITH_VALUES: [&str; 3] = ["Minimum", "Maximum", "Median"];

/// Validate all load-time invariants on a [`ReleaseStrategy`].
///
/// Collects every violation before returning so an invalid plan reports
/// everything wrong with it at once.
pub fn validate(strategy: &ReleaseStrategy) -> Result<(), Vec<StrategyError>> {
    let mut errors = Vec::new();

    let stage_names: HashSet<&str> = strategy.stages.iter().map(|s| s.name.as_str()).collect();

    for stage in &strategy.stages {
        // ── Traffic percentages sum to exactly 100 ───────────────────
        let total: i64 = stage.variants.iter().map(|v| v.traffic_percentage).sum();
        if total != 100 {
            errors.push(StrategyError::InvalidField {
                stage: stage.name.clone(),
                field: "variants".into(),
                value: total.to_string(),
                reason: "total traffic percentage must be exactly 100".into(),
            });
        }

        // ── Metric thresholds parse ──────────────────────────────────
        for condition in &stage.metric_conditions {
            if let Err(e) = ThresholdExpr::parse(&condition.threshold) {
                errors.push(StrategyError::InvalidField {
                    stage: stage.name.clone(),
                    field: format!("metrics_conditions.{}.threshold", condition.name),
                    value: condition.threshold.clone(),
                    reason: e.to_string(),
                });
            }

            // ── compareWith belongs to the allowed set ───────────────
            if !condition.compare_with.is_empty()
                && !COMPARE_WITH_VALUES.contains(&condition.compare_with.as_str())
            {
                errors.push(StrategyError::InvalidField {
                    stage: stage.name.clone(),
                    field: format!("metrics_conditions.{}.compareWith", condition.name),
                    value: condition.compare_with.clone(),
                    reason: format!("allowed values are {COMPARE_WITH_VALUES:?}"),
                });
            }
        }

        // ── End actions: present, resolvable, no self-loop ───────────
        for (field, action) in [
            ("end_action.onSuccess", &stage.end_action.on_success),
            ("end_action.onFailure", &stage.end_action.on_failure),
        ] {
            if action.is_empty() {
                errors.push(StrategyError::InvalidField {
                    stage: stage.name.clone(),
                    field: field.into(),
                    value: String::new(),
                    reason: "end_action must have both onSuccess and onFailure keys".into(),
                });
            } else if action == &stage.name {
                errors.push(StrategyError::InvalidField {
                    stage: stage.name.clone(),
                    field: field.into(),
                    value: action.clone(),
                    reason: "end action must not loop back to its own stage".into(),
                });
            } else if action != "rollout"
                && action != "rollback"
                && !stage_names.contains(action.as_str())
            {
                errors.push(StrategyError::InvalidField {
                    stage: stage.name.clone(),
                    field: field.into(),
                    value: action.clone(),
                    reason: "must be 'rollout', 'rollback', or the name of another stage".into(),
                });
            }
        }
    }

    // ── Rollback version resolves within every function ──────────────
    let rollback = &strategy.rollback.action.function;
    for function in &strategy.functions {
        if function.version_by_name(rollback).is_err() {
            errors.push(StrategyError::Validation(format!(
                "rollback function '{}' is not defined for function '{}'",
                rollback, function.name
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
