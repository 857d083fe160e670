//! Agent binary.
//!
//! Loads the YAML config, wires the configured FaaS backend, and runs in
//! one of two modes:
//!
//! - **Local**: a `strategyPath` is configured; run that plan once and
//!   exit.
//! - **Hierarchical**: no strategy path; poll the parent for release
//!   plans indefinitely, running each one as it arrives.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use canary_agent::config::{self, Config, FaasKind};
use canary_agent::faas::{FaasBackend, TinyFaasBackend};
use canary_agent::parent::ParentClient;
use canary_agent::release::engine::ReleaseEngine;
use canary_agent::{init_tracing, strategy, AgentError};

/// Delay between polls in hierarchical mode.
const POLL_LOOP_DELAY: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yml".to_string());

    let cfg = match config::load_from_file(Path::new(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg.log_level);

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "agent terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), AgentError> {
    let faas = build_backend(&cfg).await?;

    let parent = cfg
        .parent
        .as_ref()
        .map(|p| ParentClient::new(&p.host, p.port));

    match &cfg.strategy_path {
        Some(path) => {
            info!(path, "running local strategy once");
            let strategy = strategy::load_from_file(Path::new(path))?;
            let mut engine = ReleaseEngine::new(faas.clone(), cfg.agent.host.clone());
            if let Some(parent) = parent {
                engine = engine.with_parent(parent);
            }
            let result = engine.run(&strategy).await;
            if let Err(e) = faas.close().await {
                error!(error = %e, "failed to close the FaaS backend");
            }
            result
        }
        None => run_hierarchical(cfg, faas, parent).await,
    }
}

/// Build the configured FaaS backend.
async fn build_backend(cfg: &Config) -> Result<Arc<dyn FaasBackend>, AgentError> {
    match cfg.faas.kind {
        FaasKind::Tinyfaas => {
            let host = cfg.faas.host.clone().unwrap_or_default();
            let port = cfg.faas.port.unwrap_or_default();
            let gateway = cfg.faas.proxy_host.clone().unwrap_or_default();
            let backend = TinyFaasBackend::new(&host, port, &gateway);
            // Stale deployments from a previous run must not shadow this
            // release.
            backend.wipe_functions().await?;
            Ok(Arc::new(backend))
        }
        FaasKind::Gcp => Err(AgentError::faas(
            "init",
            "gcp",
            "the gcp backend is not built into this binary",
        )),
    }
}

/// Poll the parent forever, running each new release plan as it arrives.
async fn run_hierarchical(
    cfg: Config,
    faas: Arc<dyn FaasBackend>,
    parent: Option<ParentClient>,
) -> Result<(), AgentError> {
    let parent = parent.ok_or_else(|| {
        AgentError::parent("/poll", "hierarchical mode requires a parent endpoint")
    })?;
    let service_area = cfg.service_area_polygon()?;
    let mut agent_id = String::new();

    loop {
        let response = parent.poll(&agent_id, &service_area).await;
        agent_id = response.id;

        if !response.new_release.is_empty() {
            info!(release = %response.new_release, id = %agent_id, "new release available");
            // A failed release leaves the agent polling; the parent sees
            // the failure through the missing summary.
            if let Err(e) = run_release(
                &cfg,
                faas.clone(),
                &parent,
                &agent_id,
                &response.new_release,
            )
            .await
            {
                error!(release = %response.new_release, error = %e, "release run failed");
            }
        }

        tokio::time::sleep(POLL_LOOP_DELAY).await;
    }
}

/// Download and execute one release plan.
async fn run_release(
    cfg: &Config,
    faas: Arc<dyn FaasBackend>,
    parent: &ParentClient,
    agent_id: &str,
    release_id: &str,
) -> Result<(), AgentError> {
    let plan_path = parent
        .download_release(agent_id, release_id, Path::new("releases"))
        .await?;
    parent
        .download_release_functions(release_id, Path::new("."))
        .await?;

    let strategy = strategy::load_from_file(&plan_path)?;
    let engine = ReleaseEngine::new(faas, cfg.agent.host.clone())
        .with_parent(parent.clone())
        .with_agent_id(agent_id.to_string());
    engine.run(&strategy).await
}
