//! Release engine.
//!
//! Drives the ordered stage list of a strategy. For each stage it resolves
//! the target function and rollback version, dispatches by stage type,
//! evaluates the summary, executes the resulting end action (rollout,
//! rollback, or a jump to a named stage), and reports the summary to the
//! parent.
//!
//! Exactly one stage runs at a time; the engine itself is single-threaded
//! and owns the FaaS adapter for the duration of a plan.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::evaluate::evaluate_stage;
use super::runner::StageRunner;
use super::{InheritedUris, TriadDeployment};
use crate::faas::{FaasBackend, DEFAULT_ENTRY_POINT};
use crate::metrics::{self, StageStatus};
use crate::parent::{ParentClient, ResultRequest};
use crate::strategy::{Function, FunctionVersion, ReleaseStrategy, Stage, StageType};
use crate::AgentError;

/// Top-level driver for one release strategy.
pub struct ReleaseEngine {
    faas: Arc<dyn FaasBackend>,
    parent: Option<ParentClient>,
    agent_id: String,
    agent_host: String,
    ingest_port: u16,
}

impl ReleaseEngine {
    pub fn new(faas: Arc<dyn FaasBackend>, agent_host: impl Into<String>) -> Self {
        Self {
            faas,
            parent: None,
            agent_id: String::new(),
            agent_host: agent_host.into(),
            ingest_port: metrics::INGEST_PORT,
        }
    }

    /// Attach a parent client; summaries are uploaded after every stage.
    pub fn with_parent(mut self, parent: ParentClient) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the agent identifier assigned by the parent.
    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = id.into();
        self
    }

    /// Override the metric ingestion port (tests run engines in parallel).
    pub fn with_ingest_port(mut self, port: u16) -> Self {
        self.ingest_port = port;
        self
    }

    /// Run the strategy's stages to a terminal action.
    ///
    /// Starts at the first stage; named end-actions jump to their target
    /// stage, `rollout`/`rollback` finalise the release. When two
    /// consecutive stages target the same function the A/B URIs are handed
    /// over so the runner can skip redundant deploys.
    pub async fn run(&self, strategy: &ReleaseStrategy) -> Result<(), AgentError> {
        let runner = StageRunner::new(self.faas.clone(), self.agent_host.clone())
            .with_ingest_port(self.ingest_port);

        let mut current = strategy
            .stages
            .first()
            .ok_or_else(|| AgentError::MissingStage("(no stages in strategy)".into()))?;
        let mut inherited: Option<InheritedUris> = None;

        loop {
            let function = strategy
                .function_by_name(&current.func_name)
                .ok_or_else(|| AgentError::MissingFunction(current.func_name.clone()))?;
            let rollback_version = function.version_by_name(&strategy.rollback.action.function)?;

            info!(
                stage = %current.name,
                kind = ?current.stage_type,
                func = %current.func_name,
                "starting stage"
            );

            let reuse = inherited
                .take()
                .filter(|previous| previous.func_name == current.func_name);
            let outcome = match current.stage_type {
                StageType::AbTest => runner.run_stage(current, function, reuse.as_ref()).await?,
                StageType::WaitForSignal => {
                    let parent = self.parent.as_ref().ok_or_else(|| {
                        AgentError::parent(
                            "/end_stage",
                            "WaitForSignal stage requires a parent endpoint",
                        )
                    })?;
                    runner
                        .run_stage_with_signal(
                            current,
                            function,
                            reuse.as_ref(),
                            parent,
                            &self.agent_id,
                            &strategy.id,
                        )
                        .await?
                }
            };

            info!("stage metrics:\n{}", outcome.aggregator.summary_text());
            let mut summary = outcome.aggregator.summarize();
            let evaluation = evaluate_stage(current, &summary);

            info!("running after-test instructions, checking if rollback is required");
            let next: Option<&Stage> = if evaluation.rollback_required {
                warn!(
                    version = %strategy.rollback.action.function,
                    "rollback is required, deploying the declared rollback version"
                );
                summary.status = StageStatus::Error;
                self.replace_chosen(&outcome.triad, rollback_version).await;
                None
            } else if evaluation.success {
                info!(stage = %current.name, "all requirements met, proceeding with onSuccess action");
                summary.status = StageStatus::Completed;
                self.resolve_end_action(
                    &current.end_action.on_success,
                    &outcome.triad,
                    function,
                    strategy,
                )
                .await?
            } else {
                warn!(stage = %current.name, "requirements not met, proceeding with onFailure action");
                let (f1_errors, f1_calls) = outcome.aggregator.f1_errors();
                if f1_errors != 0.0 {
                    warn!(
                        errors = f1_errors,
                        calls = f1_calls,
                        "however, f1 had errors during the test"
                    );
                }
                summary.status = StageStatus::Failure;
                self.resolve_end_action(
                    &current.end_action.on_failure,
                    &outcome.triad,
                    function,
                    strategy,
                )
                .await?
            };

            info!(
                min = summary.f1_times_summary.minimum,
                max = summary.f1_times_summary.maximum,
                "f1 response time (ms)"
            );
            info!(
                min = summary.f2_times_summary.minimum,
                max = summary.f2_times_summary.maximum,
                "f2 response time (ms)"
            );

            let next_stage_name = next.map(|s| s.name.clone()).unwrap_or_default();
            self.send_summary(&strategy.id, summary, next_stage_name)
                .await;

            match next {
                Some(stage) => {
                    inherited = Some(InheritedUris {
                        func_name: current.func_name.clone(),
                        a_uri: outcome.triad.a_uri.clone(),
                        b_uri: outcome.triad.b_uri.clone(),
                    });
                    current = stage;
                }
                None => return Ok(()),
            }
        }
    }

    /// Execute one end action: terminal rollout/rollback, or resolve the
    /// named successor stage.
    async fn resolve_end_action<'s>(
        &self,
        action: &str,
        triad: &TriadDeployment,
        function: &Function,
        strategy: &'s ReleaseStrategy,
    ) -> Result<Option<&'s Stage>, AgentError> {
        info!(action, "processing end action");
        match action {
            "rollout" => {
                info!("(rollout) replacing with the new function version");
                self.replace_chosen(triad, &function.new_version).await;
                Ok(None)
            }
            "rollback" => {
                info!("(rollback) replacing with the base function version");
                self.replace_chosen(triad, &function.base_version).await;
                Ok(None)
            }
            name => strategy
                .stage_by_name(name)
                .map(Some)
                .ok_or_else(|| AgentError::MissingStage(name.to_string())),
        }
    }

    /// Deploy the winning version under the function's public name and
    /// delete the A/B aliases. Failures are logged; finalisation proceeds
    /// as far as it can.
    async fn replace_chosen(&self, triad: &TriadDeployment, version: &FunctionVersion) {
        if let Err(e) = self
            .faas
            .update(
                &triad.func_name,
                &version.path,
                &version.env,
                DEFAULT_ENTRY_POINT,
                version.is_full_path,
                &[],
            )
            .await
        {
            error!(
                function = %triad.func_name,
                error = %e,
                "error replacing proxy function with the selected version"
            );
        }
        for name in [&triad.a_name, &triad.b_name] {
            if let Err(e) = self.faas.delete(name).await {
                error!(function = %name, error = %e, "error cleaning up function");
            }
        }
    }

    /// Upload one summary; absence of a parent and upload failures are
    /// logged, never fatal.
    async fn send_summary(
        &self,
        release_id: &str,
        summary: crate::metrics::ResultSummary,
        next_stage: String,
    ) {
        let Some(parent) = &self.parent else {
            debug!("no parent configured, skipping result upload");
            return;
        };
        let request = ResultRequest {
            id: self.agent_id.clone(),
            release_id: release_id.to_string(),
            stage_summaries: vec![summary],
            next_stage,
        };
        if let Err(e) = parent.send_result(&request).await {
            error!(error = %e, "failed to send result summary");
        }
    }
}
