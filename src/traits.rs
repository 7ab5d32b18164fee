//! Core trait for embedding clients.

use anyhow::Result;
use async_trait::async_trait;

/// Request for generating an embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    /// The text to embed. May be empty.
    pub text: String,
}

/// Response containing the generated embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    /// The embedding vector.
    pub embedding: Vec<f32>,
    /// The dimension of the embedding.
    pub dimension: u32,
}

/// A loaded model that turns text into vectors.
///
/// Implementations are immutable once constructed and shared across requests.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Width of the vectors this client produces.
    fn dimension(&self) -> u32;

    /// Identifier of the loaded model.
    fn model_name(&self) -> &str;
}
