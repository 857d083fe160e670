//! # FaaS backend abstraction
//!
//! Provides the [`FaasBackend`] trait and implementations:
//! - [`TinyFaasBackend`]: local container-based provider, driven over its
//!   HTTP management API
//! - [`InMemoryFaas`]: recording backend for tests and demos
//!
//! Implementations differ in entry-point semantics, source packaging, and
//! URI construction; none of that leaks into the release engine.

pub mod adapt;
pub mod inmemory;
pub mod tinyfaas;

use async_trait::async_trait;

use crate::AgentError;

pub use inmemory::{FaasOp, InMemoryFaas};
pub use tinyfaas::TinyFaasBackend;

/// Entry point name used for every function the agent deploys.
pub const DEFAULT_ENTRY_POINT: &str = "http";

/// Capability set the release engine needs from one FaaS provider.
///
/// Implementations must be thread-safe (Send + Sync) for use behind
/// `Arc<dyn FaasBackend>`. Operation failures are surfaced to the caller;
/// the adapter never reconciles a partially deployed triad, that is the
/// stage runner's job.
#[async_trait]
pub trait FaasBackend: Send + Sync {
    /// Deploy a new function and return the external URI it is callable at.
    ///
    /// `env_args` is an ordered list of `KEY=VALUE` strings; ordering is
    /// not semantically significant.
    async fn upload(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        entry_point: &str,
        full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError>;

    /// Update an existing function. An idempotent upsert is acceptable.
    async fn update(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        entry_point: &str,
        full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError>;

    /// Whether a function with this name is currently deployed.
    async fn function_exists(&self, name: &str) -> Result<bool, AgentError>;

    /// Remove a deployed function.
    async fn delete(&self, name: &str) -> Result<(), AgentError>;

    /// Release any provider resources.
    async fn close(&self) -> Result<(), AgentError>;

    /// Path to the traffic-splitting proxy binary built for this provider.
    fn proxy_binary_path(&self) -> &str;
}
