//! Stage runner.
//!
//! Executes one stage of a strategy in four phases:
//!
//! 1. **Deploy** — baseline as `{func}01`, candidate as `{func}02`
//!    (update when present, upload otherwise), unless inherited URIs from
//!    a previous stage over the same function make the deploys redundant.
//!    The proxy is always redeployed under the public name: its env args
//!    (traffic split, endpoints, program tag) change every stage.
//! 2. **Observe** — poll the metric aggregator at 1 Hz until the stage's
//!    end conditions (`minCalls`, `minDuration`) are both satisfied. A
//!    stage that has seen no calls at all keeps waiting.
//! 3. **Signal variant** — additionally watch for the parent's end signal;
//!    when the end conditions are met first and evaluation succeeds, send
//!    one interim `SuccessWaiting` summary and keep collecting.
//! 4. **Teardown** — stop the aggregator server. Runs on every exit path;
//!    the deployed functions are left for the engine to finalise.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::evaluate::evaluate_stage;
use super::{InheritedUris, StageRunOutcome, TriadDeployment};
use crate::faas::{FaasBackend, DEFAULT_ENTRY_POINT};
use crate::metrics::{self, MetricAggregator, StageStatus};
use crate::parent::{self, ParentClient, ResultRequest};
use crate::strategy::{Function, FunctionVersion, Stage, StrategyError};
use crate::AgentError;

/// Interval between observation ticks.
const OBSERVE_TICK: Duration = Duration::from_secs(1);

/// Runs single stages against one FaaS backend.
pub struct StageRunner {
    faas: Arc<dyn FaasBackend>,
    agent_host: String,
    ingest_port: u16,
}

impl StageRunner {
    pub fn new(faas: Arc<dyn FaasBackend>, agent_host: impl Into<String>) -> Self {
        Self {
            faas,
            agent_host: agent_host.into(),
            ingest_port: metrics::INGEST_PORT,
        }
    }

    /// Override the metric ingestion port (tests run stages in parallel).
    pub fn with_ingest_port(mut self, port: u16) -> Self {
        self.ingest_port = port;
        self
    }

    /// Run a plain A/B stage to completion.
    pub async fn run_stage(
        &self,
        stage: &Stage,
        function: &Function,
        inherited: Option<&InheritedUris>,
    ) -> Result<StageRunOutcome, AgentError> {
        let (min_calls, min_duration) = parse_end_conditions(stage)?;
        info!(
            func = %stage.func_name,
            min_calls,
            min_duration = ?min_duration,
            "running release test"
        );

        let mut triad = TriadDeployment::plan(stage);
        self.deploy_versions(&mut triad, function, inherited).await?;

        let (aggregator, shutdown_tx, server) = self.start_aggregator(&triad).await?;

        let run = async {
            self.deploy_proxy(&triad).await?;
            info!("now polling metric aggregator for test result");
            self.observe(&aggregator, stage, min_calls, min_duration)
                .await;
            Ok(())
        };
        let result: Result<(), AgentError> = run.await;

        // Teardown always runs, even when the proxy deploy failed.
        let _ = shutdown_tx.send(());
        join_server(server).await;

        result.map(|()| StageRunOutcome { triad, aggregator })
    }

    /// Run a WaitForSignal stage: like [`run_stage`](Self::run_stage), but
    /// the observation loop also returns on the parent's end signal, and a
    /// successful evaluation before the signal is reported upstream once
    /// as `SuccessWaiting`.
    pub async fn run_stage_with_signal(
        &self,
        stage: &Stage,
        function: &Function,
        inherited: Option<&InheritedUris>,
        parent: &ParentClient,
        agent_id: &str,
        strategy_id: &str,
    ) -> Result<StageRunOutcome, AgentError> {
        let (min_calls, min_duration) = parse_end_conditions(stage)?;
        info!(func = %stage.func_name, "running release test with end signal");

        let mut triad = TriadDeployment::plan(stage);
        self.deploy_versions(&mut triad, function, inherited).await?;

        let (aggregator, shutdown_tx, server) = self.start_aggregator(&triad).await?;
        let (signal_rx, poller) = parent::spawn_signal_poller(
            parent.clone(),
            agent_id.to_string(),
            strategy_id.to_string(),
            stage.name.clone(),
        );

        let run = async {
            self.deploy_proxy(&triad).await?;
            info!("now polling the parent for the end signal");
            self.observe_with_signal(
                &aggregator,
                stage,
                min_calls,
                min_duration,
                signal_rx,
                parent,
                agent_id,
                strategy_id,
            )
            .await;
            Ok(())
        };
        let result: Result<(), AgentError> = run.await;

        poller.abort();
        let _ = shutdown_tx.send(());
        join_server(server).await;

        result.map(|()| StageRunOutcome { triad, aggregator })
    }

    /// Deploy A and B, or adopt the URIs handed over by the previous
    /// stage.
    async fn deploy_versions(
        &self,
        triad: &mut TriadDeployment,
        function: &Function,
        inherited: Option<&InheritedUris>,
    ) -> Result<(), AgentError> {
        if let Some(previous) = inherited {
            if previous.a_uri.is_empty() || previous.b_uri.is_empty() {
                return Err(AgentError::faas(
                    "reuse",
                    &triad.func_name,
                    "inherited URIs must not be empty",
                ));
            }
            triad.a_uri = previous.a_uri.clone();
            triad.b_uri = previous.b_uri.clone();
            info!(
                f1_uri = %triad.a_uri,
                f2_uri = %triad.b_uri,
                "skipped function deployment, re-using previously deployed functions"
            );
            return Ok(());
        }

        info!(function = %triad.a_name, path = %function.base_version.path, "duplicating the base function");
        triad.a_uri = self
            .deploy_version(&triad.a_name, &function.base_version)
            .await?;
        info!(function = %triad.b_name, path = %function.new_version.path, "deploying the new version");
        triad.b_uri = self
            .deploy_version(&triad.b_name, &function.new_version)
            .await?;
        Ok(())
    }

    /// Probe-then-upsert one version: update if the name exists, upload
    /// otherwise.
    async fn deploy_version(
        &self,
        name: &str,
        version: &FunctionVersion,
    ) -> Result<String, AgentError> {
        let exists = self.faas.function_exists(name).await?;
        if exists {
            debug!(function = name, "function exists, updating");
            self.faas
                .update(
                    name,
                    &version.path,
                    &version.env,
                    DEFAULT_ENTRY_POINT,
                    version.is_full_path,
                    &[],
                )
                .await
        } else {
            debug!(function = name, "function not deployed yet, uploading");
            self.faas
                .upload(
                    name,
                    &version.path,
                    &version.env,
                    DEFAULT_ENTRY_POINT,
                    version.is_full_path,
                    &[],
                )
                .await
        }
    }

    /// Redeploy the traffic proxy under the public function name with this
    /// stage's endpoints and split.
    async fn deploy_proxy(&self, triad: &TriadDeployment) -> Result<(), AgentError> {
        let env_args = vec![
            format!("F1ENDPOINT={}", triad.a_uri),
            format!("F2ENDPOINT={}", triad.b_uri),
            format!("AGENTHOST={}", self.agent_host),
            format!("F1NAME={}", triad.a_name),
            format!("F2NAME={}", triad.b_name),
            format!("PROGRAM={}", triad.program),
            format!("BCHANCE={}", triad.b_traffic),
        ];

        let proxy_path = self.faas.proxy_binary_path().to_string();
        info!(function = %triad.func_name, path = %proxy_path, "uploading proxy function");
        self.faas
            .update(
                &triad.func_name,
                &proxy_path,
                "python",
                DEFAULT_ENTRY_POINT,
                true,
                &env_args,
            )
            .await?;
        info!(
            function = %triad.func_name,
            "uploaded proxy function, traffic is now managed by the proxy"
        );
        Ok(())
    }

    /// Bind the ingestion listener and start the aggregator server.
    async fn start_aggregator(
        &self,
        triad: &TriadDeployment,
    ) -> Result<
        (
            Arc<MetricAggregator>,
            oneshot::Sender<()>,
            tokio::task::JoinHandle<Result<(), AgentError>>,
        ),
        AgentError,
    > {
        info!("starting metric aggregator");
        let aggregator = Arc::new(MetricAggregator::new(
            triad.program.clone(),
            triad.stage_name.clone(),
        ));
        let listener = TcpListener::bind(("0.0.0.0", self.ingest_port))
            .await
            .map_err(|e| AgentError::MetricServer(e.to_string()))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(metrics::server::serve(
            aggregator.clone(),
            listener,
            shutdown_rx,
        ));
        Ok((aggregator, shutdown_tx, server))
    }

    /// Poll the aggregator at 1 Hz until both end conditions hold.
    ///
    /// A stage that has seen zero calls never terminates here, whatever
    /// its end conditions say: observation requires at least one call.
    async fn observe(
        &self,
        aggregator: &MetricAggregator,
        stage: &Stage,
        min_calls: u64,
        min_duration: Duration,
    ) {
        let beginning = Instant::now();
        let mut ticker = tokio::time::interval(OBSERVE_TICK);
        loop {
            ticker.tick().await;
            if self.check_end_conditions(aggregator, stage, beginning, min_calls, min_duration) {
                return;
            }
        }
    }

    /// One observation tick; true when the stage may end.
    fn check_end_conditions(
        &self,
        aggregator: &MetricAggregator,
        stage: &Stage,
        beginning: Instant,
        min_calls: u64,
        min_duration: Duration,
    ) -> bool {
        let elapsed = beginning.elapsed();
        let observation = aggregator.observation();
        let call_count = observation.call_count as u64;

        if call_count == 0 {
            debug!(
                func = %stage.func_name,
                elapsed = ?elapsed,
                "no calls yet, waiting"
            );
            return false;
        }

        let last_response_time = match observation.last_proxy_time {
            Some(value) => value,
            None => {
                error!("call_count exists but no response time recorded, continuing");
                -1.0
            }
        };

        if call_count >= min_calls {
            if elapsed >= min_duration {
                info!(
                    elapsed = ?elapsed,
                    calls = call_count,
                    last_ms = last_response_time,
                    "release test end conditions satisfied"
                );
                return true;
            }
            info!(
                calls = call_count,
                elapsed = ?elapsed,
                min_duration = ?min_duration,
                last_ms = last_response_time,
                "min call count reached, min duration not yet satisfied"
            );
        } else if elapsed >= min_duration {
            info!(
                calls = call_count,
                min_calls,
                last_ms = last_response_time,
                "min duration reached, min call count not yet satisfied"
            );
        } else {
            info!(
                calls = call_count,
                last_ms = last_response_time,
                elapsed = ?elapsed,
                "release test in progress"
            );
        }
        false
    }

    /// The WaitForSignal observation loop.
    ///
    /// Ends immediately when the signal fires. When the end conditions are
    /// satisfied first, the stage is evaluated: failure and
    /// rollback-required outcomes end the stage at once, success is
    /// reported upstream once as `SuccessWaiting` while collection
    /// continues until the signal.
    #[allow(clippy::too_many_arguments)]
    async fn observe_with_signal(
        &self,
        aggregator: &MetricAggregator,
        stage: &Stage,
        min_calls: u64,
        min_duration: Duration,
        mut signal_rx: oneshot::Receiver<()>,
        parent: &ParentClient,
        agent_id: &str,
        strategy_id: &str,
    ) {
        let beginning = Instant::now();
        let mut ticker = tokio::time::interval(OBSERVE_TICK);
        let mut results_already_sent = false;
        loop {
            tokio::select! {
                _ = &mut signal_rx => {
                    info!(
                        func = %stage.func_name,
                        "received external signal to end the release test"
                    );
                    return;
                }
                _ = ticker.tick() => {
                    if results_already_sent {
                        let observation = aggregator.observation();
                        info!(
                            calls = observation.call_count,
                            elapsed = ?beginning.elapsed(),
                            "requirements met, waiting for the end signal"
                        );
                        continue;
                    }
                    if !self.check_end_conditions(
                        aggregator, stage, beginning, min_calls, min_duration,
                    ) {
                        continue;
                    }

                    let mut summary = aggregator.summarize();
                    let evaluation = evaluate_stage(stage, &summary);
                    if evaluation.rollback_required || !evaluation.success {
                        // Failure paths do not wait for the signal.
                        return;
                    }

                    summary.status = StageStatus::SuccessWaiting;
                    let on_success = &stage.end_action.on_success;
                    let next_stage = if on_success == "rollout" {
                        String::new()
                    } else {
                        on_success.clone()
                    };
                    let request = ResultRequest {
                        id: agent_id.to_string(),
                        release_id: strategy_id.to_string(),
                        stage_summaries: vec![summary],
                        next_stage,
                    };
                    match parent.send_result(&request).await {
                        Ok(()) => results_already_sent = true,
                        Err(e) => error!(error = %e, "failed to send interim result summary"),
                    }
                }
            }
        }
    }
}

/// Wait for the aggregator server task and log how it went.
async fn join_server(server: tokio::task::JoinHandle<Result<(), AgentError>>) {
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "metric server exited with error"),
        Err(e) => warn!(error = %e, "metric server task failed"),
    }
}

/// Parse a stage's end conditions into `(minCalls, minDuration)`.
///
/// Defaults are zero calls and `0s`; unknown condition names are ignored
/// with a warning.
fn parse_end_conditions(stage: &Stage) -> Result<(u64, Duration), AgentError> {
    let mut min_calls = 0u64;
    let mut min_duration = Duration::ZERO;
    for condition in &stage.end_conditions {
        match condition.name.as_str() {
            "minDuration" => {
                min_duration = parse_duration(&condition.threshold)?;
            }
            "minCalls" => {
                min_calls = condition.threshold.trim().parse().map_err(|_| {
                    StrategyError::InvalidField {
                        stage: stage.name.clone(),
                        field: "end_conditions.minCalls".into(),
                        value: condition.threshold.clone(),
                        reason: "must be a non-negative integer".into(),
                    }
                })?;
            }
            other => warn!(condition = other, "unknown end condition, ignoring"),
        }
    }
    Ok((min_calls, min_duration))
}

/// Parse a duration string of `<number><unit>` terms, e.g. `90s`, `500ms`,
/// `1m30s`, `1.5h`.
fn parse_duration(input: &str) -> Result<Duration, AgentError> {
    let invalid = |reason: &str| {
        AgentError::Strategy(StrategyError::Threshold {
            expr: input.to_string(),
            reason: reason.to_string(),
        })
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let mut unit = String::from(c);
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphabetic() {
                unit.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number
            .parse()
            .map_err(|_| invalid(&format!("invalid number '{number}'")))?;
        number.clear();
        let seconds = match unit.as_str() {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return Err(invalid(&format!("unknown unit '{unit}'"))),
        };
        total += Duration::from_secs_f64(seconds);
    }
    if !number.is_empty() {
        return Err(invalid("missing unit"));
    }
    Ok(total)
}
