//! # canary-agent
//!
//! A progressive-release agent for serverless (FaaS) functions.
//!
//! ## Architecture
//!
//! For each managed function the agent drives a multi-stage release plan:
//! a new version (B) is deployed next to the baseline (A) behind a
//! traffic-splitting proxy, live call metrics stream back from the proxy,
//! and per-stage success criteria decide whether to roll out, roll back,
//! or continue to a named successor stage.
//!
//! ```text
//! Parent ──plan──▶ ReleaseEngine ──stage──▶ StageRunner ──deploys──▶ FaasBackend
//!    ▲                                          │  ▲
//!    └────summaries────────────────────────────┘  └──samples── MetricAggregator ◀─POST─ proxy
//! ```

use thiserror::Error;

pub mod config;
pub mod faas;
pub mod metrics;
pub mod parent;
pub mod release;
pub mod strategy;

// Re-exports
pub use faas::{FaasBackend, InMemoryFaas, TinyFaasBackend};
pub use metrics::{MetricAggregator, ResultSummary, StageStatus};
pub use parent::ParentClient;
pub use release::engine::ReleaseEngine;
pub use strategy::ReleaseStrategy;

/// Agent-wide runtime errors.
///
/// Load-time problems have their own types ([`config::ConfigError`],
/// [`strategy::StrategyError`]); everything that can go wrong while a
/// release is running funnels through here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Strategy(#[from] strategy::StrategyError),

    #[error("FaaS {operation} failed for '{function}': {message}")]
    Faas {
        operation: String,
        function: String,
        message: String,
    },

    #[error("parent request to {endpoint} failed: {message}")]
    Parent { endpoint: String, message: String },

    #[error("metric server error: {0}")]
    MetricServer(String),

    #[error("function '{0}' is not defined in the strategy")]
    MissingFunction(String),

    #[error("stage '{0}' is not defined in the strategy")]
    MissingStage(String),

    #[error("release archive error: {0}")]
    Archive(String),

    #[error("function adaptation failed: {0}")]
    Adapt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Shorthand for a FaaS operation failure.
    pub fn faas(operation: &str, function: &str, message: impl ToString) -> Self {
        Self::Faas {
            operation: operation.to_string(),
            function: function.to_string(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a parent-protocol failure.
    pub fn parent(endpoint: &str, message: impl ToString) -> Self {
        Self::Parent {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

/// Initialise tracing from a configured level, with env-filter override
/// support. Call once at binary startup.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
