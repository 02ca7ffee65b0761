//! Integration tests for the fine-tune management passthrough routes.
//!
//! Verifies that:
//! - /models, /list, /model-detail, /cancel-model and /delete-model reach
//!   the matching provider endpoint and wrap its answer in a Success envelope
//! - /create-model forwards the job and reshapes provider failures
//!   into `{status: 'Fail', message, data: null}`
//! - Provider statuses map to the fixed user-facing messages
//! - /config reports settings and the month-to-date balance
//! - /prepare-data stores the upload under a generated name and forwards it,
//!   with or without a configured secret
//!
//! Uses `wiremock` as the fake provider.

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::config::{Config, Secret};
use chatrelay::proxy::{create_router, AppState};

fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.provider.base_url = base_url.to_string();
    config.provider.api_key = Some(Secret::from("sk-test"));
    config
}

fn setup_test_app(config: Config) -> axum::Router {
    create_router(AppState::new(config).expect("app state"))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn fine_tune(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "object": "fine-tune",
        "model": "curie",
        "created_at": 1614807352,
        "status": status,
        "hyperparams": {"batch_size": 4, "learning_rate_multiplier": 0.1, "n_epochs": 4, "prompt_loss_weight": 0.1},
        "training_files": [{"id": "file-abc", "object": "file", "filename": "train.jsonl"}],
        "result_files": [],
        "validation_files": [],
        "fine_tuned_model": null,
        "organization_id": "org-1",
        "updated_at": 1614807352
    })
}

// ============================================================================
// Passthrough routes
// ============================================================================

#[tokio::test]
async fn test_models_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-3.5-turbo", "object": "model", "created": 1677610602, "owned_by": "openai"},
                {"id": "curie:ft-acme-2023", "object": "model", "created": 1677610603, "owned_by": "org-1", "permission": []}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/models", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["data"]["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["data"][1]["permission"], json!([]));
}

#[tokio::test]
async fn test_list_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/fine-tunes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [fine_tune("ft-1", "succeeded"), fine_tune("ft-2", "pending")]
        })))
        .mount(&server)
        .await;

    let request = Request::builder()
        .uri("/api/list")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(setup_test_app(test_config(&server.uri())), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["data"][1]["status"], "pending");
}

#[tokio::test]
async fn test_model_detail_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/fine-tunes/ft-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fine_tune("ft-1", "running")))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/model-detail", json!({"id": "ft-1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "ft-1");
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["hyperparams"]["n_epochs"], 4);
}

#[tokio::test]
async fn test_model_detail_requires_id() {
    let server = MockServer::start().await;
    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/model-detail", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"status": "Fail", "message": "id is required", "data": null})
    );
}

#[tokio::test]
async fn test_cancel_model_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/fine-tunes/ft-1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fine_tune("ft-1", "cancelled")))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/cancel-model", json!({"id": "ft-1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
}

#[tokio::test]
async fn test_delete_model_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/models/curie-ft-acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "curie-ft-acme",
            "object": "model",
            "deleted": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request(
            "POST",
            "/delete-model",
            json!({"fine_tuned_model": "curie-ft-acme"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
}

// ============================================================================
// Create model
// ============================================================================

#[tokio::test]
async fn test_create_model_forwards_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/fine-tunes"))
        .and(body_partial_json(json!({
            "training_file": "file-abc",
            "model": "curie",
            "suffix": "support",
            "n_epochs": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(fine_tune("ft-new", "pending")))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request(
            "POST",
            "/create-model",
            json!({
                "training_file": "file-abc",
                "model": "curie",
                "suffix": "support",
                "n_epochs": 2,
                "batch_size": null
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["data"]["id"], "ft-new");
}

#[tokio::test]
async fn test_create_model_failure_is_fail_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/fine-tunes"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "File file-missing does not exist",
                "type": "invalid_request_error",
                "param": "training_file",
                "code": null
            }
        })))
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request(
            "POST",
            "/create-model",
            json!({"training_file": "file-missing", "model": "curie"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body,
        json!({"status": "Fail", "message": "File file-missing does not exist", "data": null})
    );
}

#[tokio::test]
async fn test_create_model_requires_training_file() {
    let server = MockServer::start().await;
    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/create-model", json!({"training_file": "", "model": "curie"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "training_file is required");
}

// ============================================================================
// Status mapping
// ============================================================================

#[tokio::test]
async fn test_provider_statuses_map_to_fixed_messages() {
    let cases: [(u16, &str); 6] = [
        (401, "[OpenAI] Incorrect API key provided"),
        (403, "[OpenAI] Server refused to access, please try again later"),
        (500, "[OpenAI] Internal Server Error"),
        (502, "[OpenAI] Bad Gateway"),
        (503, "[OpenAI] Server is busy, please try again later"),
        (504, "[OpenAI] Gateway Time-out"),
    ];

    for (code, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(code).set_body_json(json!({
                "error": {"message": "raw upstream text"}
            })))
            .mount(&server)
            .await;

        let (status, body) = send(
            setup_test_app(test_config(&server.uri())),
            json_request("POST", "/models", json!({})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY, "status {}", code);
        assert_eq!(body["status"], "Fail");
        assert_eq!(body["message"], expected, "status {}", code);
    }
}

#[tokio::test]
async fn test_provider_timeout_maps_to_timeout_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"object": "list", "data": []}))
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.provider.timeout_ms = 50;
    let (status, body) = send(
        setup_test_app(config),
        json_request("POST", "/models", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["message"], "[OpenAI] Request timed out");
}

// ============================================================================
// Config
// ============================================================================

#[tokio::test]
async fn test_config_reports_balance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/dashboard/billing/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "total_usage": 1234.0
        })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.provider.model = "gpt-4o-mini".to_string();
    config.provider.timeout_ms = 30_000;
    let (status, body) = send(
        setup_test_app(config),
        json_request("POST", "/config", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({
            "apiModel": "ChatGPTAPI",
            "model": "gpt-4o-mini",
            "timeoutMs": 30000,
            "socksProxy": "-",
            "httpsProxy": "-",
            "balance": "12.34"
        })
    );
}

#[tokio::test]
async fn test_config_balance_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/dashboard/billing/usage"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/config", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["data"]["balance"], "-");
}

// ============================================================================
// Prepare data
// ============================================================================

const BOUNDARY: &str = "chatrelay-boundary";

fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, filename, content) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match filename {
            Some(f) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                name, f
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                name
            )),
        }
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_prepare_data_stores_and_forwards() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-abc",
            "object": "file",
            "bytes": 44,
            "created_at": 1677610602,
            "filename": "train.jsonl",
            "purpose": "fine-tune"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let uploads = tempfile::tempdir().unwrap();
    let upload_dir = uploads.path().join("uploads");
    let mut config = test_config(&server.uri());
    config.server.upload_dir = upload_dir.display().to_string();

    let line = "{\"prompt\":\"hi ->\",\"completion\":\" hello\\n\"}";
    let (status, body) = send(
        setup_test_app(config),
        multipart_request("/prepare-data", &[("file", Some("train.jsonl"), line)]),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["data"]["id"], "file-abc");
    assert_eq!(body["data"]["purpose"], "fine-tune");

    let stored: Vec<_> = std::fs::read_dir(&upload_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(stored.len(), 1);
    let name = stored[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with(".jsonl"), "{}", name);
    assert_ne!(name, "train.jsonl");
    assert_eq!(std::fs::read_to_string(&stored[0]).unwrap(), line);

    let received = server.received_requests().await.unwrap();
    let upstream_body = String::from_utf8_lossy(&received[0].body);
    assert!(upstream_body.contains("fine-tune"));
    assert!(upstream_body.contains("filename=\"train.jsonl\""));
}

#[tokio::test]
async fn test_prepare_data_needs_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-def",
            "object": "file",
            "bytes": 5,
            "created_at": 1677610602,
            "filename": "notes.txt",
            "purpose": "fine-tune"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let uploads = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri());
    config.server.upload_dir = uploads.path().display().to_string();
    config.auth.secret_key = Some(Secret::from("hunter2"));
    let app = setup_test_app(config);

    for uri in ["/prepare-data", "/api/prepare-data"] {
        let (status, body) = send(
            app.clone(),
            multipart_request(uri, &[("file", Some("notes.txt"), "hello")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{} {}", uri, body);
        assert_eq!(body["data"]["id"], "file-def");
    }
}

#[tokio::test]
async fn test_prepare_data_without_file_fails() {
    let server = MockServer::start().await;
    let uploads = tempfile::tempdir().unwrap();
    let mut config = test_config(&server.uri());
    config.server.upload_dir = uploads.path().display().to_string();

    let (status, body) = send(
        setup_test_app(config),
        multipart_request("/api/prepare-data", &[("note", None, "no file here")]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"status": "Fail", "message": "No file uploaded", "data": null})
    );
}

#[tokio::test]
async fn test_prepare_data_rejects_non_multipart() {
    let server = MockServer::start().await;
    let (status, body) = send(
        setup_test_app(test_config(&server.uri())),
        json_request("POST", "/prepare-data", json!({"file": "nope"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "Fail");
}
