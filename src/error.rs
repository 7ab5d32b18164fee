//! Request-time errors and their HTTP rendering.
//!
//! Bodies carry a fixed message only; causes go to the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

pub const INVALID_API_KEY: &str = "Invalid API key";
pub const EMBEDDING_FAILED: &str = "Embedding failed";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or wrong `x-api-key`.
    #[error("invalid API key")]
    Unauthorized,
    #[error("embedding failed: {0}")]
    Inference(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, INVALID_API_KEY),
            ApiError::Inference(e) => {
                error!("Embedding failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, EMBEDDING_FAILED)
            }
        };

        (
            status,
            Json(ErrorResponse {
                detail: detail.to_string(),
            }),
        )
            .into_response()
    }
}
