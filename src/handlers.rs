//! HTTP handlers module.
//!
//! `POST /embeddings` sits behind the API key gate; `GET /health` is open and
//! reveals nothing secret.

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::models::{EmbedRequest, EmbedResponse, HealthResponse};
use crate::secrets::ApiKey;
use crate::traits::{EmbeddingClient, EmbeddingRequest};

/// Application state shared across handlers. Read-only after startup.
pub struct AppState {
    pub client: Arc<dyn EmbeddingClient>,
    pub api_key: ApiKey,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/embeddings", post(create_embedding))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.client.model_name().to_string(),
        dimension: state.client.dimension(),
    })
}

/// Embed a single text.
pub async fn create_embedding(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    debug!("Embedding text of {} bytes", request.text.len());

    let response = state
        .client
        .embed(EmbeddingRequest { text: request.text })
        .await
        .map_err(ApiError::Inference)?;

    Ok(Json(EmbedResponse {
        embedding: response.embedding,
    }))
}
