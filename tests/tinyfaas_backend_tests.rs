//! Integration tests for the tinyFaaS adapter.
//!
//! The management API is mocked; assertions cover the upload payload
//! (base64 zip, runtime mapping, env args), URI construction, existence
//! probing via `/list`, deletion, wipe, and error surfacing on non-2xx
//! responses.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use canary_agent::faas::{FaasBackend, TinyFaasBackend};

/// Backend pointed at the mock management API, with a staged source tree.
fn backend(server: &MockServer, source_root: &std::path::Path) -> TinyFaasBackend {
    TinyFaasBackend::new("localhost", 8080, "host.docker.internal")
        .with_management_url(server.uri())
        .with_source_root(source_root)
}

fn write_python_function(root: &std::path::Path, name: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("test: create function dir");
    std::fs::write(dir.join("fn.py"), "def fn(data, args):\n    return data\n")
        .expect("test: write source");
}

#[tokio::test]
async fn test_upload_posts_base64_zip_and_returns_gateway_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_partial_json(json!({
            "name": "sieve01",
            "env": "python3",
            "threads": 1,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    write_python_function(root.path(), "fns/sieve");

    let uri = backend(&server, root.path())
        .upload("sieve01", "fns/sieve", "python", "http", false, &[])
        .await
        .expect("test: upload");
    assert_eq!(uri, "http://host.docker.internal:8000/sieve01");

    // The zip field must hold a non-empty base64 payload.
    let requests = server.received_requests().await.expect("test: requests");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("test: decode upload body");
    let encoded = body["zip"].as_str().expect("test: zip field");
    assert!(!encoded.is_empty());
    assert!(body["envs"].is_array());
}

#[tokio::test]
async fn test_upload_forwards_env_args() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_partial_json(json!({
            "envs": ["BCHANCE=10", "PROGRAM=test-sieve"],
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    write_python_function(root.path(), "fns/sieve");

    backend(&server, root.path())
        .upload(
            "sieve",
            "fns/sieve",
            "python",
            "http",
            false,
            &["BCHANCE=10".into(), "PROGRAM=test-sieve".into()],
        )
        .await
        .expect("test: upload");
}

#[tokio::test]
async fn test_upload_rejects_unsupported_runtime() {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().expect("test: create source root");

    let err = backend(&server, root.path())
        .upload("sieve01", "fns/sieve", "ruby", "http", false, &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ruby"));
}

#[tokio::test]
async fn test_upload_surfaces_non_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    write_python_function(root.path(), "fns/sieve");

    let err = backend(&server, root.path())
        .upload("sieve01", "fns/sieve", "python", "http", false, &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn test_function_exists_matches_whole_lines_of_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("sieve01\nsieve02\n"))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    let faas = backend(&server, root.path());
    assert!(faas.function_exists("sieve01").await.expect("test"));
    assert!(faas.function_exists("sieve02").await.expect("test"));
    assert!(!faas.function_exists("sieve").await.expect("test"));
    assert!(!faas.function_exists("sieve0").await.expect("test"));
}

#[tokio::test]
async fn test_delete_posts_function_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_partial_json(json!({"name": "sieve01"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    backend(&server, root.path())
        .delete("sieve01")
        .await
        .expect("test: delete");
}

#[tokio::test]
async fn test_wipe_functions_hits_wipe_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wipe"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    backend(&server, root.path())
        .wipe_functions()
        .await
        .expect("test: wipe");
}

#[tokio::test]
async fn test_update_is_an_upsert_over_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().expect("test: create source root");
    write_python_function(root.path(), "fns/sieve");

    let uri = backend(&server, root.path())
        .update("sieve", "fns/sieve", "python", "http", false, &[])
        .await
        .expect("test: update");
    assert_eq!(uri, "http://host.docker.internal:8000/sieve");
}
