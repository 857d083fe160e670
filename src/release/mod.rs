//! # Release orchestration
//!
//! The stage runner deploys one A/B/proxy triad and observes it until its
//! end conditions hold; the engine walks the strategy's stage graph,
//! evaluates each summary, and executes the resulting end action.

pub mod engine;
pub mod evaluate;
pub mod runner;

use std::sync::Arc;

use tracing::warn;

use crate::metrics::MetricAggregator;
use crate::strategy::Stage;

/// The three deployments that make up one stage run: baseline under
/// `{func}01`, candidate under `{func}02`, and the traffic proxy under the
/// function's public name.
#[derive(Debug, Clone)]
pub struct TriadDeployment {
    pub func_name: String,
    pub a_name: String,
    pub b_name: String,
    pub a_uri: String,
    pub b_uri: String,
    /// Program tag the proxy reports metrics under.
    pub program: String,
    pub stage_name: String,
    pub a_traffic: i64,
    pub b_traffic: i64,
}

impl TriadDeployment {
    /// Derive names, program tag, and traffic split from a stage. URIs are
    /// filled in by the deploy phase.
    pub fn plan(stage: &Stage) -> Self {
        let func_name = stage.func_name.clone();
        let (a_traffic, b_traffic) = traffic_split(stage);
        Self {
            a_name: format!("{func_name}01"),
            b_name: format!("{func_name}02"),
            a_uri: String::new(),
            b_uri: String::new(),
            program: format!("test-{func_name}"),
            stage_name: stage.name.clone(),
            func_name,
            a_traffic,
            b_traffic,
        }
    }
}

/// URIs handed over from a previous stage that targeted the same function,
/// letting the next stage skip the A/B deploys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedUris {
    pub func_name: String,
    pub a_uri: String,
    pub b_uri: String,
}

/// What a stage run leaves behind: the deployed triad and the frozen
/// aggregator, ready to summarise.
pub struct StageRunOutcome {
    pub triad: TriadDeployment,
    pub aggregator: Arc<MetricAggregator>,
}

/// Read the stage's traffic split. Unknown variant names are ignored with
/// a warning; more than two versions is not supported.
fn traffic_split(stage: &Stage) -> (i64, i64) {
    let mut a_traffic = 100;
    let mut b_traffic = 0;
    for variant in &stage.variants {
        match variant.name.as_str() {
            "base_version" => a_traffic = variant.traffic_percentage,
            "new_version" => b_traffic = variant.traffic_percentage,
            other => warn!(variant = other, "unknown variant, ignoring"),
        }
    }
    if a_traffic + b_traffic != 100 {
        // Validation rejects this at load; reachable only for hand-built
        // stages.
        warn!(a_traffic, b_traffic, "traffic percentages do not sum to 100");
    }
    (a_traffic, b_traffic)
}
