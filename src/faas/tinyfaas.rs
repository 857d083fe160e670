//! tinyFaaS backend.
//!
//! Drives a tinyFaaS instance over its HTTP management API:
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/upload` | POST | deploy a function from a base64 zip |
//! | `/delete` | POST | remove a function |
//! | `/list`   | GET  | newline-separated function names |
//! | `/wipe`   | POST | remove every function |
//!
//! Deployed functions are served from the provider's gateway on port 8000;
//! the URI handed back to the engine points at the configured `proxyHost`
//! so the traffic proxy can reach the function from inside its container.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, info};

use super::adapt;
use super::FaasBackend;
use crate::AgentError;

/// Gateway port tinyFaaS serves functions on.
const GATEWAY_PORT: u16 = 8000;

/// Proxy binary built for the tinyFaaS handler shape.
const PROXY_BINARY_PATH: &str = "../release-proxy/binary/tinyfaas-amd64";

/// Map the strategy's runtime tags onto tinyFaaS environment names.
fn tinyfaas_runtime(runtime: &str) -> Option<&'static str> {
    match runtime {
        "python" => Some("python3"),
        "nodejs" => Some("nodejs"),
        "go" => Some("go"),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    name: &'a str,
    env: &'a str,
    threads: u32,
    zip: String,
    envs: &'a [String],
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    name: &'a str,
}

/// tinyFaaS adapter over the management API.
#[derive(Debug, Clone)]
pub struct TinyFaasBackend {
    http: reqwest::Client,
    management_url: String,
    gateway_url: String,
    /// Root that relative function paths resolve against.
    source_root: PathBuf,
}

impl TinyFaasBackend {
    /// Adapter for a tinyFaaS management API at `host:port`, with deployed
    /// functions reachable under `gateway_host`.
    pub fn new(host: &str, port: u16, gateway_host: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            management_url: format!("http://{host}:{port}"),
            gateway_url: format!("http://{gateway_host}:{GATEWAY_PORT}"),
            source_root: PathBuf::from("."),
        }
    }

    /// Override the root that relative function paths resolve against.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    /// Override the management URL (used by tests against a mock server).
    pub fn with_management_url(mut self, url: impl Into<String>) -> Self {
        self.management_url = url.into();
        self
    }

    /// Remove every function on the instance. Called at startup so stale
    /// deployments from a previous run cannot shadow this release.
    pub async fn wipe_functions(&self) -> Result<(), AgentError> {
        let response = self
            .http
            .post(format!("{}/wipe", self.management_url))
            .send()
            .await
            .map_err(|e| AgentError::faas("wipe", "*", e))?;
        if !response.status().is_success() {
            return Err(AgentError::faas(
                "wipe",
                "*",
                format!("non-successful response ({})", response.status()),
            ));
        }
        info!("wiped all tinyfaas functions");
        Ok(())
    }

    /// Newline-separated names of deployed functions.
    async fn list_functions(&self) -> Result<String, AgentError> {
        let response = self
            .http
            .get(format!("{}/list", self.management_url))
            .send()
            .await
            .map_err(|e| AgentError::faas("list", "*", e))?;
        if !response.status().is_success() {
            return Err(AgentError::faas(
                "list",
                "*",
                format!("non-successful response ({})", response.status()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| AgentError::faas("list", "*", e))
    }

    fn function_uri(&self, name: &str) -> String {
        format!("{}/{name}", self.gateway_url)
    }

    async fn deploy(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError> {
        let env = tinyfaas_runtime(runtime).ok_or_else(|| {
            AgentError::faas("upload", name, format!("runtime '{runtime}' not supported"))
        })?;

        let source = if full_path {
            PathBuf::from(path)
        } else {
            self.source_root.join(path)
        };
        // Staged copy lives until the upload request completes.
        let staged = adapt::stage_for_tinyfaas(&source, runtime)?;
        let archive = zip_directory(staged.path())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(archive);

        let request = UploadRequest {
            name,
            env,
            threads: 1,
            zip: encoded,
            envs: env_args,
        };
        debug!(function = name, runtime = env, "uploading to tinyfaas");
        let response = self
            .http
            .post(format!("{}/upload", self.management_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::faas("upload", name, e))?;

        if !response.status().is_success() {
            return Err(AgentError::faas(
                "upload",
                name,
                format!("non-successful response ({})", response.status()),
            ));
        }

        Ok(self.function_uri(name))
    }
}

#[async_trait]
impl FaasBackend for TinyFaasBackend {
    async fn upload(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        _entry_point: &str,
        full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError> {
        self.deploy(name, path, runtime, full_path, env_args).await
    }

    // tinyFaaS has no separate update call; re-uploading under the same
    // name replaces the deployment.
    async fn update(
        &self,
        name: &str,
        path: &str,
        runtime: &str,
        entry_point: &str,
        full_path: bool,
        env_args: &[String],
    ) -> Result<String, AgentError> {
        self.upload(name, path, runtime, entry_point, full_path, env_args)
            .await
    }

    async fn function_exists(&self, name: &str) -> Result<bool, AgentError> {
        let listing = self.list_functions().await?;
        Ok(listing.lines().any(|line| line == name))
    }

    async fn delete(&self, name: &str) -> Result<(), AgentError> {
        let request = DeleteRequest { name };
        let response = self
            .http
            .post(format!("{}/delete", self.management_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::faas("delete", name, e))?;
        if !response.status().is_success() {
            return Err(AgentError::faas(
                "delete",
                name,
                format!("non-successful response ({})", response.status()),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn proxy_binary_path(&self) -> &str {
        PROXY_BINARY_PATH
    }
}

/// Zip a directory tree into an in-memory archive, paths relative to
/// `root`.
fn zip_directory(root: &Path) -> Result<Vec<u8>, AgentError> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options: zip::write::SimpleFileOptions = Default::default();
        add_dir_entries(&mut writer, root, root, options)?;
        writer
            .finish()
            .map_err(|e| AgentError::Archive(e.to_string()))?;
    }
    Ok(buffer.into_inner())
}

fn add_dir_entries<W: std::io::Write + std::io::Seek>(
    writer: &mut zip::ZipWriter<W>,
    root: &Path,
    dir: &Path,
    options: zip::write::SimpleFileOptions,
) -> Result<(), AgentError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| AgentError::Archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        if entry.file_type()?.is_dir() {
            writer
                .add_directory(format!("{relative}/"), options)
                .map_err(|e| AgentError::Archive(e.to_string()))?;
            add_dir_entries(writer, root, &path, options)?;
        } else {
            writer
                .start_file(relative, options)
                .map_err(|e| AgentError::Archive(e.to_string()))?;
            let contents = std::fs::read(&path)?;
            writer.write_all(&contents)?;
        }
    }
    Ok(())
}
