//! Plain HTTP endpoint tests: `GET /generate` and `GET /health`

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use relay_core::backend::test_utils::ScriptedBackend;
use relay_core::BackendError;

use common::start_relay;

async fn get_json(url: String) -> (u16, Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn test_generate_returns_full_response() {
    let backend = ScriptedBackend::new()
        .with_generate_result("Why is the sky blue?", Ok("Rayleigh scattering.".into()));
    let server = start_relay(Arc::new(backend)).await;

    let url = format!(
        "http://{}/generate?text=Why%20is%20the%20sky%20blue%3F",
        server.local_addr()
    );
    let (status, body) = get_json(url).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({ "response": "Rayleigh scattering." }));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_generate_without_text_is_bad_request() {
    let server = start_relay(Arc::new(ScriptedBackend::new())).await;
    let addr = server.local_addr();

    let (status, body) = get_json(format!("http://{addr}/generate")).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "no prompt text provided" }));

    let (status, _) = get_json(format!("http://{addr}/generate?text=%20%20")).await;
    assert_eq!(status, 400);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_generate_backend_failure_is_server_error() {
    let backend = ScriptedBackend::new().with_generate_result(
        "boom",
        Err(BackendError::Rejected {
            status: 500,
            body: "internal".into(),
        }),
    );
    let server = start_relay(Arc::new(backend)).await;

    let (status, body) =
        get_json(format!("http://{}/generate?text=boom", server.local_addr())).await;

    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": "API request error" }));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_reports_backend_reachability() {
    let backend = ScriptedBackend::new();
    let server = start_relay(Arc::new(backend.clone())).await;
    let url = format!("http://{}/health", server.local_addr());

    let (status, body) = get_json(url.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "status": "ok", "backend": true }));

    backend.set_healthy(false);
    let (_, body) = get_json(url).await;
    assert_eq!(body, json!({ "status": "ok", "backend": false }));

    server.shutdown().await.unwrap();
}
