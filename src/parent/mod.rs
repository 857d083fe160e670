//! # Parent-protocol client
//!
//! ## Responsibility
//! Talk to the parent controller: poll for new release plans, download
//! plan and function artefacts, poll for stage-end signals, and upload
//! stage summaries.
//!
//! ## Guarantees
//! - `poll` retries forever on transport or decode failure; a decoded
//!   response is returned as-is, never retried
//! - Result uploads are attempted exactly once
//! - Non-2xx responses are surfaced as errors with the body quoted where
//!   the protocol provides one
//!
//! ## NOT Responsible For
//! - Deciding what to do with a release plan (that belongs to the binary
//!   and `release::engine`)

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Geometry;
use crate::metrics::ResultSummary;
use crate::AgentError;

/// Fixed delay between poll retries.
pub const POLL_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Warm-up before the signal poller starts asking the parent.
pub const SIGNAL_WARMUP: Duration = Duration::from_secs(5);
/// Interval between signal polls.
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Back-off after a failed signal poll.
pub const SIGNAL_BACKOFF: Duration = Duration::from_secs(1);

/// Body of `POST /poll`.
#[derive(Debug, Serialize)]
struct PollRequest<'a> {
    id: &'a str,
    number_of_children: u32,
    geographic_area: &'a Geometry,
}

/// Response of `POST /poll`: a persistent agent id and, optionally, the
/// identifier of a newly available release plan.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PollResponse {
    pub id: String,
    #[serde(rename = "new_release", default)]
    pub new_release: String,
}

/// Body of `POST /end_stage`.
#[derive(Debug, Serialize)]
struct EndStageRequest<'a> {
    id: &'a str,
    strategy_id: &'a str,
    stage_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct EndStageResponse {
    end_stage: bool,
}

/// Body of `POST /result`.
///
/// `next_stage` is the empty string when the engine is about to execute a
/// terminal rollout or rollback.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultRequest {
    pub id: String,
    pub release_id: String,
    pub stage_summaries: Vec<ResultSummary>,
    pub next_stage: String,
}

/// HTTP client for the parent controller.
#[derive(Debug, Clone)]
pub struct ParentClient {
    http: reqwest::Client,
    base_url: String,
}

impl ParentClient {
    /// Client for a parent at `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_base_url(format!("http://{host}:{port}"))
    }

    /// Client for an explicit base URL (used by tests against a mock
    /// server).
    pub fn from_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Poll the parent until a response decodes.
    ///
    /// `id` is empty on the very first poll; the parent assigns one. As a
    /// leaf node the agent always reports zero children. Transport and
    /// decode failures retry with a fixed delay forever.
    pub async fn poll(&self, id: &str, service_area: &Geometry) -> PollResponse {
        let url = format!("{}/poll", self.base_url);
        info!(%url, "polling parent");

        let request = PollRequest {
            id,
            number_of_children: 0,
            geographic_area: service_area,
        };

        loop {
            let response = match self.http.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "failed to poll parent");
                    tokio::time::sleep(POLL_RETRY_INTERVAL).await;
                    continue;
                }
            };

            match response.json::<PollResponse>().await {
                Ok(decoded) => return decoded,
                Err(e) => {
                    error!(error = %e, "failed to decode poll response");
                    tokio::time::sleep(POLL_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Download the release plan and save it under `dir` as
    /// `release_<timestamp>.yml`.
    pub async fn download_release(
        &self,
        child_id: &str,
        release_id: &str,
        dir: &Path,
    ) -> Result<PathBuf, AgentError> {
        let url = format!(
            "{}/release?childID={child_id}&releaseID={release_id}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::parent("/release", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::parent(
                "/release",
                format!("received status code {status}: {body}"),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::parent("/release", e))?;

        std::fs::create_dir_all(dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("release_{timestamp}.yml"));
        std::fs::write(&path, &body)?;

        info!(path = %path.display(), "release downloaded");
        Ok(path)
    }

    /// Download the release's function sources (a ZIP archive) and extract
    /// them under `dest`.
    pub async fn download_release_functions(
        &self,
        release_id: &str,
        dest: &Path,
    ) -> Result<(), AgentError> {
        let url = format!("{}/release/functions/{release_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::parent("/release/functions", e))?;

        if !response.status().is_success() {
            return Err(AgentError::parent(
                "/release/functions",
                format!("received status code {}", response.status()),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::parent("/release/functions", e))?;

        extract_zip(&body, dest)
    }

    /// Ask the parent whether the named stage should end.
    ///
    /// Used only by WaitForSignal stages, from the detached signal poller.
    pub async fn poll_for_signal(
        &self,
        id: &str,
        strategy_id: &str,
        stage_name: &str,
    ) -> Result<bool, AgentError> {
        let url = format!("{}/end_stage", self.base_url);
        let request = EndStageRequest {
            id,
            strategy_id,
            stage_name,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::parent("/end_stage", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::parent(
                "/end_stage",
                format!("received non-OK HTTP status {status}: {body}"),
            ));
        }

        let decoded: EndStageResponse = response
            .json()
            .await
            .map_err(|e| AgentError::parent("/end_stage", e))?;
        debug!(end_stage = decoded.end_stage, "polled for signal");
        Ok(decoded.end_stage)
    }

    /// Upload one stage summary. Attempted once; a non-200 response is an
    /// error.
    pub async fn send_result(&self, request: &ResultRequest) -> Result<(), AgentError> {
        info!(
            release = %request.release_id,
            next_stage = %request.next_stage,
            "sending result summary to parent"
        );
        let url = format!("{}/result", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::parent("/result", e))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::parent(
                "/result",
                format!("received non-OK response: {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Start the detached end-signal poller for a WaitForSignal stage.
///
/// After a warm-up the task polls `/end_stage` once per second, backing off
/// one second on errors. When the parent says the stage should end, the
/// returned receiver fires. The caller aborts the handle when the stage
/// exits through another path.
pub fn spawn_signal_poller(
    client: ParentClient,
    id: String,
    strategy_id: String,
    stage_name: String,
) -> (oneshot::Receiver<()>, JoinHandle<()>) {
    let (signal_tx, signal_rx) = oneshot::channel();
    info!(
        stage = %stage_name,
        warmup_s = SIGNAL_WARMUP.as_secs(),
        "polling for signal to end the stage after warm-up"
    );

    let handle = tokio::spawn(async move {
        tokio::time::sleep(SIGNAL_WARMUP).await;
        loop {
            match client.poll_for_signal(&id, &strategy_id, &stage_name).await {
                Ok(true) => {
                    let _ = signal_tx.send(());
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "signal polling error, backing off");
                    tokio::time::sleep(SIGNAL_BACKOFF).await;
                    continue;
                }
            }
            tokio::time::sleep(SIGNAL_POLL_INTERVAL).await;
        }
    });

    (signal_rx, handle)
}

/// Extract a ZIP archive into `dest`.
///
/// macOS metadata entries (`__MACOSX/`) are dropped; directory entries are
/// created; file modes are preserved where the platform supports them.
fn extract_zip(bytes: &[u8], dest: &Path) -> Result<(), AgentError> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| AgentError::Archive(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| AgentError::Archive(e.to_string()))?;

        if entry.name().starts_with("__MACOSX/") {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(AgentError::Archive(format!(
                "illegal file path in archive: {}",
                entry.name()
            )));
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        outfile.write_all(&contents)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_response_tolerates_missing_new_release() {
        let decoded: PollResponse =
            serde_json::from_str(r#"{"id":"agent-1"}"#).expect("test: decode");
        assert_eq!(decoded.id, "agent-1");
        assert!(decoded.new_release.is_empty());
    }

    #[test]
    fn test_result_request_wire_format() {
        let request = ResultRequest {
            id: "agent-1".into(),
            release_id: "rel-7".into(),
            stage_summaries: vec![],
            next_stage: String::new(),
        };
        let json = serde_json::to_value(&request).expect("test: serialize");
        assert_eq!(json["id"], "agent-1");
        assert_eq!(json["release_id"], "rel-7");
        assert_eq!(json["next_stage"], "");
        assert!(json["stage_summaries"].is_array());
    }

    #[test]
    fn test_extract_zip_drops_macos_metadata_and_creates_dirs() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options: zip::write::SimpleFileOptions = Default::default();
            writer
                .add_directory("fns/", options)
                .expect("test: add dir");
            writer
                .start_file("fns/index.js", options)
                .expect("test: start file");
            writer
                .write_all(b"module.exports = () => {};")
                .expect("test: write entry");
            writer
                .start_file("__MACOSX/fns/._index.js", options)
                .expect("test: start metadata file");
            writer.write_all(b"junk").expect("test: write metadata");
            writer.finish().expect("test: finish");
        }

        let dir = tempfile::tempdir().expect("test: create tempdir");
        extract_zip(buffer.get_ref(), dir.path()).expect("test: extract");

        assert!(dir.path().join("fns").is_dir());
        assert!(dir.path().join("fns/index.js").is_file());
        assert!(!dir.path().join("__MACOSX").exists());
        let content =
            std::fs::read_to_string(dir.path().join("fns/index.js")).expect("test: read");
        assert!(content.contains("module.exports"));
    }

    #[test]
    fn test_extract_zip_rejects_garbage() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let result = extract_zip(b"definitely not a zip", dir.path());
        assert!(matches!(result.unwrap_err(), AgentError::Archive(_)));
    }
}
