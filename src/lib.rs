//! Keyed Embeddings - Library Entry Point
//!
//! A sentence-embedding HTTP service protected by a single shared API key.
//! The model runs locally through ONNX Runtime and is downloaded into a
//! local cache on first start.

pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pooling;
pub mod provisioner;
pub mod secrets;
pub mod traits;

// Re-export commonly used types
pub use clients::{LocalEmbeddingClient, LocalModelConfig};
pub use config::Config;
pub use handlers::{router, AppState};
pub use provisioner::{HubFetcher, ModelFetcher, ModelProvisioner};
pub use secrets::{provision_api_key, ApiKey, EnvFileStore};
pub use traits::{EmbeddingClient, EmbeddingRequest, EmbeddingResponse};
