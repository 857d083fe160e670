//! Integration tests for the parent-protocol client.
//!
//! Every parent endpoint is exercised against a mock server:
//! - `/poll` request shape and response decoding
//! - `/release` download-to-file behaviour and error surfacing
//! - `/release/functions/{id}` ZIP extraction
//! - `/end_stage` decoding and non-2xx handling
//! - `/result` upload and non-200 handling

use std::io::Write;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use canary_agent::config::Geometry;
use canary_agent::parent::{ParentClient, ResultRequest};

fn service_area() -> Geometry {
    Geometry {
        kind: "Polygon".into(),
        coordinates: json!([[[13.0, 52.0], [13.8, 52.0], [13.8, 52.7], [13.0, 52.0]]]),
    }
}

// ============================================================================
// /poll
// ============================================================================

#[tokio::test]
async fn test_poll_sends_leaf_identity_and_decodes_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/poll"))
        .and(body_partial_json(json!({
            "id": "",
            "number_of_children": 0,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "agent-42", "new_release": "rel-7"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    let response = client.poll("", &service_area()).await;
    assert_eq!(response.id, "agent-42");
    assert_eq!(response.new_release, "rel-7");
}

#[tokio::test]
async fn test_poll_includes_geographic_area() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/poll"))
        .and(body_partial_json(json!({
            "geographic_area": {"type": "Polygon"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "agent-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    let response = client.poll("agent-1", &service_area()).await;
    assert_eq!(response.id, "agent-1");
    assert!(response.new_release.is_empty());
}

// ============================================================================
// /release
// ============================================================================

#[tokio::test]
async fn test_download_release_writes_plan_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/release"))
        .and(query_param("childID", "agent-1"))
        .and(query_param("releaseID", "rel-7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("id: rel-7\nname: plan\n"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("test: create tempdir");
    let client = ParentClient::from_base_url(server.uri());
    let path = client
        .download_release("agent-1", "rel-7", dir.path())
        .await
        .expect("test: download");

    let name = path
        .file_name()
        .expect("test: file name")
        .to_string_lossy()
        .into_owned();
    assert!(name.starts_with("release_"));
    assert!(name.ends_with(".yml"));
    let content = std::fs::read_to_string(&path).expect("test: read plan");
    assert!(content.contains("id: rel-7"));
}

#[tokio::test]
async fn test_download_release_surfaces_non_2xx_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/release"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such release"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("test: create tempdir");
    let client = ParentClient::from_base_url(server.uri());
    let err = client
        .download_release("agent-1", "rel-404", dir.path())
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("404"));
    assert!(msg.contains("no such release"));
}

// ============================================================================
// /release/functions/{id}
// ============================================================================

fn functions_zip() -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options: zip::write::SimpleFileOptions = Default::default();
        writer
            .add_directory("fns/sieve/", options)
            .expect("test: add dir");
        writer
            .start_file("fns/sieve/index.js", options)
            .expect("test: start file");
        writer
            .write_all(b"exports.handler = (req, res) => { res.send('2'); }")
            .expect("test: write");
        writer
            .start_file("__MACOSX/fns/._sieve", options)
            .expect("test: start metadata");
        writer.write_all(b"junk").expect("test: write metadata");
        writer.finish().expect("test: finish");
    }
    buffer.into_inner()
}

#[tokio::test]
async fn test_download_release_functions_extracts_archive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/release/functions/rel-7"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(functions_zip()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("test: create tempdir");
    let client = ParentClient::from_base_url(server.uri());
    client
        .download_release_functions("rel-7", dir.path())
        .await
        .expect("test: download functions");

    assert!(dir.path().join("fns/sieve/index.js").is_file());
    assert!(!dir.path().join("__MACOSX").exists());
}

#[tokio::test]
async fn test_download_release_functions_non_2xx_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/release/functions/rel-7"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("test: create tempdir");
    let client = ParentClient::from_base_url(server.uri());
    let err = client
        .download_release_functions("rel-7", dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("500"));
}

// ============================================================================
// /end_stage
// ============================================================================

#[tokio::test]
async fn test_poll_for_signal_decodes_end_stage_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/end_stage"))
        .and(body_partial_json(json!({
            "id": "agent-1",
            "strategy_id": "rel-7",
            "stage_name": "hold",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"end_stage": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    let end = client
        .poll_for_signal("agent-1", "rel-7", "hold")
        .await
        .expect("test: poll for signal");
    assert!(end);
}

#[tokio::test]
async fn test_poll_for_signal_non_2xx_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/end_stage"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    let err = client
        .poll_for_signal("agent-1", "rel-7", "hold")
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("503"));
    assert!(msg.contains("maintenance"));
}

// ============================================================================
// /result
// ============================================================================

#[tokio::test]
async fn test_send_result_posts_summaries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/result"))
        .and(body_partial_json(json!({
            "id": "agent-1",
            "release_id": "rel-7",
            "next_stage": "half",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    client
        .send_result(&ResultRequest {
            id: "agent-1".into(),
            release_id: "rel-7".into(),
            stage_summaries: vec![],
            next_stage: "half".into(),
        })
        .await
        .expect("test: send result");
}

#[tokio::test]
async fn test_send_result_non_200_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = ParentClient::from_base_url(server.uri());
    let err = client
        .send_result(&ResultRequest {
            id: "agent-1".into(),
            release_id: "rel-7".into(),
            stage_summaries: vec![],
            next_stage: String::new(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("502"));
}
