//! HTTP client behavior against a mock DSP server.

use mockito::Matcher;
use ntcore_core::args::Params;
use ntcore_core::api::{ApiClient, ApiResponse, HttpApiClient, Payload};
use ntcore_core::config::SdkConfig;
use ntcore_core::error::{ApiError, NtcoreError};
use ntcore_core::{Client, SerializableModel};
use serde_json::json;
use std::path::PathBuf;

fn client_for(server: &mockito::Server) -> HttpApiClient {
    HttpApiClient::new(&SdkConfig::with_server(server.url()).with_api_token("secret")).unwrap()
}

#[test]
fn test_get_sends_sdk_headers() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/dsp/api/v1/workspaces")
        .match_header("authorization", "Bearer secret")
        .match_header("x-sdk-type", "Rust")
        .match_header("x-sdk-version", env!("CARGO_PKG_VERSION"))
        .match_header("x-sdk-contextid", Matcher::Regex("^[0-9a-f-]{36}$".into()))
        .match_header("accept", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"WS1"}]"#)
        .create();

    let api = client_for(&server);
    let response = api.do_get("workspaces").unwrap();
    assert_eq!(response.as_json(), Some(&json!([{ "id": "WS1" }])));
    mock.assert();
}

#[test]
fn test_basic_auth_without_token() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/dsp/api/v1/workspaces")
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create();

    let mut config = SdkConfig::with_server(server.url());
    config.username = Some("ada".into());
    config.password = Some("lovelace".into());
    let api = HttpApiClient::new(&config).unwrap();
    api.do_get("workspaces").unwrap();
    mock.assert();
}

#[test]
fn test_no_content_is_empty() {
    let mut server = mockito::Server::new();
    server
        .mock("DELETE", "/dsp/api/v1/workspace/WS1")
        .with_status(204)
        .create();

    let api = client_for(&server);
    assert_eq!(api.do_delete("workspace/WS1").unwrap(), ApiResponse::Empty);
}

#[test]
fn test_errors_key_is_server_error() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/dsp/api/v1/workspace/WS1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":["workspace not found"]}"#)
        .create();

    let api = client_for(&server);
    match api.do_get("workspace/WS1") {
        Err(ApiError::Server { body }) => {
            assert_eq!(body["errors"][0], json!("workspace not found"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn test_failed_status_with_json_is_server_error() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/dsp/api/v1/workspaces")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"boom"}"#)
        .create();

    let api = client_for(&server);
    assert!(matches!(
        api.do_get("workspaces"),
        Err(ApiError::Server { .. })
    ));
}

#[test]
fn test_malformed_json_is_garbage() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/dsp/api/v1/workspaces")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{not json")
        .create();

    let api = client_for(&server);
    assert!(matches!(
        api.do_get("workspaces"),
        Err(ApiError::GarbageResponse { .. })
    ));
}

#[test]
fn test_non_json_bodies() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/dsp/api/v1/WS1/models/2")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body(b"\x00\x01model".as_slice())
        .create();
    server
        .mock("GET", "/dsp/api/v1/WS1/models/9")
        .with_status(404)
        .with_header("content-type", "text/plain")
        .with_body("not found")
        .create();

    let api = client_for(&server);
    assert_eq!(
        api.do_get("WS1/models/2").unwrap().into_bytes(),
        Some(b"\x00\x01model".to_vec())
    );
    assert!(matches!(
        api.do_get("WS1/models/9"),
        Err(ApiError::Status { status: 404, .. })
    ));
}

#[test]
fn test_unreachable_server_is_communication_error() {
    let api = HttpApiClient::new(&SdkConfig::with_server("http://127.0.0.1:1/")).unwrap();
    assert!(matches!(
        api.do_get("workspaces"),
        Err(ApiError::Communication { .. })
    ));
}

#[test]
fn test_form_and_json_payloads() {
    let mut server = mockito::Server::new();
    let registry = server
        .mock("POST", "/dsp/api/v1/workspace/WS1/registry")
        .match_body(Matcher::UrlEncoded("version".into(), "3".into()))
        .with_status(204)
        .create();
    let workspace = server
        .mock("POST", "/dsp/api/v1/workspace")
        .match_body(Matcher::Json(json!({ "type": "API", "name": "churn" })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"WS2"}"#)
        .create();

    let client = Client::new(&SdkConfig::with_server(server.url())).unwrap();
    client.register_experiment("WS1", 3).unwrap();
    let created = client.create_workspace("churn").unwrap();
    assert_eq!(created["id"], json!("WS2"));
    registry.assert();
    workspace.assert();
}

#[test]
fn test_experiment_upload_is_multipart() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/dsp/api/v1/WS1/experiment")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".into()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="runtime""#.into()),
            Matcher::Regex(r#"name="framework"\r\n\r\npytorch"#.into()),
            Matcher::Regex(r#"name="parameters"\r\n\r\n\{"epochs":3\}"#.into()),
            Matcher::Regex(r#"name="metrics""#.into()),
            Matcher::Regex(r#"name="model"; filename="model""#.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"E1"}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("net.pt");
    std::fs::write(&weights, b"weights").unwrap();

    let client = Client::new(&SdkConfig::with_server(server.url())).unwrap();
    let mut run = client.start_run("WS1");
    run.extend_pretraining_metadata(Params::from([("epochs".to_string(), json!(3))]));
    run.set_serializable_model(SerializableModel::Path(weights));
    run.save().unwrap();
    mock.assert();
}

#[test]
fn test_save_against_unreachable_server() {
    let dir = tempfile::tempdir().unwrap();
    let pickle = dir.path().join("model.pkl");
    std::fs::write(&pickle, b"pickled").unwrap();

    let client = Client::new(&SdkConfig::with_server("http://127.0.0.1:1/")).unwrap();
    let mut run = client.start_run("WS1");
    run.set_serializable_model(PathBuf::from(&pickle));
    let err = run.save().unwrap_err();
    assert!(matches!(
        err,
        NtcoreError::Api(ApiError::Communication { .. })
    ));
    assert!(client.is_active(run.id()));
}

#[test]
fn test_download_registered_version() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/dsp/api/v1/workspace/WS1/registry")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"version":4}"#)
        .create();
    let model = server
        .mock("GET", "/dsp/api/v1/WS1/models/4")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body("archived")
        .create();

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.bin");
    let client = Client::new(&SdkConfig::with_server(server.url())).unwrap();
    client.download_model(&target, "WS1", 0).unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"archived");
    model.assert();
}

#[test]
fn test_file_part_upgrades_form() {
    let payload = Payload::form().field("a", "1").file("model", vec![1, 2]);
    assert!(matches!(payload, Payload::Multipart { .. }));
    assert_eq!(payload.field_value("a"), Some("1"));
}
