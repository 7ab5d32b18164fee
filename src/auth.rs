//! API key gate for the embedding route.
//!
//! The `x-api-key` header must equal the provisioned key byte for byte.
//! Rejection happens before the request body is read, so a bad key never
//! costs an inference.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::handlers::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware that admits only requests carrying the service API key.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .is_some_and(|value| state.api_key.matches(value.as_bytes()));

    if authorized {
        next.run(request).await
    } else {
        debug!(
            "Rejected {} {}: missing or invalid {}",
            request.method(),
            request.uri().path(),
            API_KEY_HEADER
        );
        ApiError::Unauthorized.into_response()
    }
}
