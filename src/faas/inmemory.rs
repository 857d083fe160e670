//! In-memory FaaS backend for tests and demos.
//!
//! Records every operation and serves deterministic URIs so release flows
//! can run without a real provider, the way an echo worker stands in for a
//! model backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::FaasBackend;
use crate::AgentError;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaasOp {
    Upload { name: String },
    Update { name: String },
    Delete { name: String },
}

/// A function as the in-memory provider sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedFunction {
    pub path: String,
    pub runtime: String,
    pub env_args: Vec<String>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    functions: HashMap<String, DeployedFunction>,
    operations: Vec<FaasOp>,
}

/// Recording backend; all state lives behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryFaas {
    state: Mutex<InMemoryState>,
}

impl InMemoryFaas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation performed so far, in order.
    pub fn operations(&self) -> Vec<FaasOp> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .operations
            .clone()
    }

    /// The current deployment under `name`, if any.
    pub fn deployed(&self, name: &str) -> Option<DeployedFunction> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .functions
            .get(name)
            .cloned()
    }

    /// Names of currently deployed functions, sorted.
    pub fn deployed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .functions
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn record(&self, op: FaasOp, name: &str, path: &str, runtime: &str, env_args: &[String]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.operations.push(op);
        state.functions.insert(
            name.to_string(),
            DeployedFunction {
                path: path.to_string(),
                runtime: runtime.to_string(),
                env_args: env_args.to_vec(),
            },
        );
    }
}

#[async_trait]
impl FaasBackend for InMemoryFaas {
    async fn upload(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        _entry_point: &str,
        _full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError> {
        self.record(
            FaasOp::Upload {
                name: name.to_string(),
            },
            name,
            path,
            runtime,
            env_args,
        );
        Ok(format!("http://faas.local/{name}"))
    }

    async fn update(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        _entry_point: &str,
        _full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError> {
        self.record(
            FaasOp::Update {
                name: name.to_string(),
            },
            name,
            path,
            runtime,
            env_args,
        );
        Ok(format!("http://faas.local/{name}"))
    }

    async fn function_exists(&self, name: &str) -> Result<bool, AgentError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .functions
            .contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.operations.push(FaasOp::Delete {
            name: name.to_string(),
        });
        state.functions.remove(name);
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn proxy_binary_path(&self) -> &str {
        "proxy/inmemory"
    }
}
