//! Embedding clients module.

pub mod local;

pub use local::{LocalEmbeddingClient, LocalModelConfig};
