//! # Release strategy model
//!
//! ## Responsibility
//! Define the release plan schema (stages, function versions, metric and
//! end conditions, rollback target) and the query operations the release
//! engine needs over a loaded plan.
//!
//! ## Guarantees
//! - Immutable after load: nothing here mutates a `ReleaseStrategy`
//! - A plan returned by [`loader::load_from_file`] satisfies every
//!   invariant in [`validation`]
//!
//! ## NOT Responsible For
//! - Running stages (that belongs to `release`)
//! - Talking to the parent (that belongs to `parent`)

pub mod loader;
pub mod threshold;
pub mod validation;

use serde::{Deserialize, Serialize};

pub use loader::{load_from_file, load_from_str};
pub use threshold::ThresholdExpr;
pub use validation::StrategyError;

fn default_true() -> bool {
    true
}

/// A complete release plan: ordered stages over a set of functions, plus a
/// pre-declared rollback version for when evaluation errors out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseStrategy {
    /// Plan identifier, assigned by whoever authored the plan.
    pub id: String,
    /// Human-readable plan name.
    pub name: String,
    /// Plan type tag (informational).
    #[serde(rename = "type")]
    pub kind: String,
    /// Functions this plan releases.
    pub functions: Vec<Function>,
    /// Ordered evaluation stages.
    pub stages: Vec<Stage>,
    /// What to deploy when a stage evaluation errors out.
    pub rollback: Rollback,
}

/// A managed function with its baseline (A) and candidate (B) versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub name: String,
    pub base_version: FunctionVersion,
    pub new_version: FunctionVersion,
}

/// One deployable version of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionVersion {
    /// Filesystem path to the function source.
    pub path: String,
    /// Runtime environment tag, e.g. `python` or `nodejs`.
    pub env: String,
    /// Worker thread count hint for providers that support it.
    #[serde(default)]
    pub threads: Option<u32>,
    /// Whether `path` is absolute (true) or relative to the provider's
    /// function root (false).
    #[serde(default = "default_true")]
    pub is_full_path: bool,
}

/// One evaluation stage of the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub name: String,
    /// Dispatch tag: plain A/B observation or signal-terminated.
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Name of the function this stage evaluates.
    pub func_name: String,
    /// Traffic split across the two versions. Percentages sum to 100.
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Success criteria applied to the stage summary.
    #[serde(rename = "metrics_conditions", default)]
    pub metric_conditions: Vec<MetricCondition>,
    /// Observation termination clauses.
    #[serde(default)]
    pub end_conditions: Vec<EndCondition>,
    /// Successors for the success and failure outcomes.
    pub end_action: EndAction,
}

/// The closed set of stage kinds. Behaviour is dispatched at the engine
/// boundary, not through polymorphism on the stage itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageType {
    /// Observe an A/B split until the end conditions are met.
    #[serde(rename = "A/B")]
    AbTest,
    /// Like A/B, but termination additionally waits for a parent signal.
    #[serde(rename = "WaitForSignal")]
    WaitForSignal,
}

/// Traffic share for one version within a stage.
///
/// `name` is `base_version` or `new_version`; anything else is ignored with
/// a warning at run time (more than two versions is not supported).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub name: String,
    #[serde(rename = "trafficPercentage")]
    pub traffic_percentage: i64,
}

/// A post-observation success criterion on a summary field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricCondition {
    /// Metric selector: `responseTime` or `errorRate`.
    pub name: String,
    /// Comparison expression, e.g. `<100` or `<=0.05`.
    pub threshold: String,
    /// Which statistic of the response-time summary to compare:
    /// `Minimum`, `Maximum`, or `Median`. Unused for `errorRate`.
    #[serde(rename = "compareWith", default)]
    pub compare_with: String,
}

impl MetricCondition {
    /// Apply this condition's threshold to an observed value.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Threshold`] when the threshold string does
    /// not parse. A threshold that survived load-time validation always
    /// parses; hitting this on a loaded plan indicates the condition was
    /// constructed by hand, and the caller escalates it to a rollback.
    pub fn is_threshold_met(&self, actual: f64) -> Result<bool, StrategyError> {
        Ok(ThresholdExpr::parse(&self.threshold)?.matches(actual))
    }
}

/// An observation termination clause: `minDuration` or `minCalls`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndCondition {
    pub name: String,
    pub threshold: String,
}

/// Successor selection per stage outcome. Each value is `rollout`,
/// `rollback`, or the name of another stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndAction {
    #[serde(rename = "onSuccess")]
    pub on_success: String,
    #[serde(rename = "onFailure")]
    pub on_failure: String,
}

/// Rollback descriptor naming one function version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollback {
    pub action: RollbackAction,
}

/// The version to deploy when evaluation produces an error status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackAction {
    pub function: String,
}

impl ReleaseStrategy {
    /// Look up a function by name.
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a stage by name; used to resolve symbolic end-actions.
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl Function {
    /// Resolve a symbolic version name to the concrete version.
    ///
    /// Accepts both the YAML spelling (`base_version`) and the struct-field
    /// spelling (`BaseVersion`).
    pub fn version_by_name(&self, name: &str) -> Result<&FunctionVersion, StrategyError> {
        match name {
            "BaseVersion" | "base_version" => Ok(&self.base_version),
            "NewVersion" | "new_version" => Ok(&self.new_version),
            _ => Err(StrategyError::UnknownVersion {
                version: name.to_string(),
                function: self.name.clone(),
            }),
        }
    }
}
