//! HTTP API tests against a stub model.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use keyed_embeddings::secrets::{ApiKey, KeySource};
use keyed_embeddings::{router, AppState, EmbeddingClient, EmbeddingRequest, EmbeddingResponse};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
const DIMENSION: usize = 384;

/// Deterministic stand-in for the ONNX model that counts invocations.
#[derive(Default)]
struct StubClient {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl EmbeddingClient for StubClient {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("onnx session exploded at /secret/path/model.onnx"));
        }

        let digest = Sha256::digest(request.text.as_bytes());
        let embedding = (0..DIMENSION)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect();

        Ok(EmbeddingResponse {
            embedding,
            dimension: DIMENSION as u32,
        })
    }

    fn dimension(&self) -> u32 {
        DIMENSION as u32
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

fn create_app(client: Arc<StubClient>) -> Router {
    router(Arc::new(AppState {
        client,
        api_key: ApiKey::new(TEST_KEY, KeySource::Environment),
    }))
}

fn embed_request(key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/embeddings")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn embedding_of(json: &serde_json::Value) -> Vec<f64> {
    json["embedding"]
        .as_array()
        .expect("embedding array")
        .iter()
        .map(|v| v.as_f64().expect("float"))
        .collect()
}

#[tokio::test]
async fn test_wrong_key_is_rejected_without_inference() {
    let client = Arc::new(StubClient::default());

    let upper = TEST_KEY.to_uppercase();
    let keys: [&str; 4] = ["wrong", "", upper.as_str(), &TEST_KEY[..63]];

    for key in keys {
        let (status, json) = send(
            create_app(client.clone()),
            embed_request(Some(key), r#"{"text": "hello world"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json, serde_json::json!({ "detail": "Invalid API key" }));
    }

    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_key_is_rejected_without_inference() {
    let client = Arc::new(StubClient::default());

    let (status, json) = send(
        create_app(client.clone()),
        embed_request(None, r#"{"text": "hello world"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["detail"], "Invalid API key");
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_auth_runs_before_body_parsing() {
    let client = Arc::new(StubClient::default());

    let (status, _) = send(create_app(client.clone()), embed_request(Some("wrong"), "not json")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_valid_key_returns_embedding() {
    let client = Arc::new(StubClient::default());

    let (status, json) = send(
        create_app(client.clone()),
        embed_request(Some(TEST_KEY), r#"{"text": "hello world"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(embedding_of(&json).len(), DIMENSION);
    assert_eq!(json.as_object().unwrap().len(), 1);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_text_is_embedded() {
    let client = Arc::new(StubClient::default());

    let (status, json) = send(
        create_app(client.clone()),
        embed_request(Some(TEST_KEY), r#"{"text": ""}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(embedding_of(&json).len(), DIMENSION);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identical_text_yields_identical_vectors() {
    let client = Arc::new(StubClient::default());
    let body = r#"{"text": "the quick brown fox"}"#;

    let (_, first) = send(create_app(client.clone()), embed_request(Some(TEST_KEY), body)).await;
    let (_, second) = send(create_app(client.clone()), embed_request(Some(TEST_KEY), body)).await;

    assert_eq!(embedding_of(&first), embedding_of(&second));
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_text_field_is_a_client_error() {
    let client = Arc::new(StubClient::default());

    let (status, _) = send(
        create_app(client.clone()),
        embed_request(Some(TEST_KEY), r#"{"input": "hello"}"#),
    )
    .await;

    assert!(status.is_client_error());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inference_failure_hides_details() {
    let client = Arc::new(StubClient {
        fail: true,
        ..Default::default()
    });

    let (status, json) = send(
        create_app(client),
        embed_request(Some(TEST_KEY), r#"{"text": "hello"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json, serde_json::json!({ "detail": "Embedding failed" }));
}

#[tokio::test]
async fn test_health_is_open_and_does_not_leak_key() {
    let client = Arc::new(StubClient::default());

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(create_app(client), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["dimension"], 384);
    assert!(!json.to_string().contains(TEST_KEY));
}
