//! Local embedding model client using ONNX Runtime.
//!
//! Loads `model.onnx` and `tokenizer.json` from a provisioned model directory
//! and runs inference entirely on-device. Inference is blocking, so requests
//! hand it to tokio's blocking pool and await the result.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::config::Config;
use crate::pooling::{mean_pool, normalize_inplace};
use crate::provisioner::{MODEL_FILE, TOKENIZER_FILE};
use crate::traits::{EmbeddingClient, EmbeddingRequest, EmbeddingResponse};

/// Configuration for the local embedding model.
#[derive(Debug, Clone)]
pub struct LocalModelConfig {
    /// Directory holding the model artifacts.
    pub model_dir: PathBuf,
    /// Expected output embedding dimension.
    pub dimension: u32,
    /// Maximum sequence length in tokens.
    pub max_length: usize,
    /// ONNX intra-op threads.
    pub intra_threads: usize,
    /// Model name for identification.
    pub model_name: String,
}

impl LocalModelConfig {
    /// Derive the model settings from the service configuration.
    pub fn from_service_config(config: &Config, model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
            dimension: config.model_dimension,
            max_length: config.max_length,
            intra_threads: config.inference_threads,
            model_name: config.model_name.clone(),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir.join(TOKENIZER_FILE)
    }
}

/// Session and tokenizer, shared with blocking inference tasks.
struct LocalModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LocalModel {
    /// Tokenize and encode text for the model.
    fn encode_text(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();

        Ok((input_ids, attention_mask))
    }

    /// Run inference on a single text.
    fn run_inference(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) = self.encode_text(text)?;
        let seq_len = input_ids.len();
        let mask = attention_mask.clone();

        let input_ids_tensor = Tensor::from_array(([1usize, seq_len], input_ids.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array(([1usize, seq_len], attention_mask.into_boxed_slice()))?;
        let token_type_ids_tensor =
            Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len].into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock session: {}", e))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
            "token_type_ids" => token_type_ids_tensor,
        ])?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No output tensor found"))?
            .1;

        let (shape, data) = output.try_extract_tensor::<f32>()?;

        // [batch, seq_len, hidden] needs pooling; [batch, hidden] is already pooled.
        let mut embedding = match shape.len() {
            3 => mean_pool(data, shape[2] as usize, &mask),
            2 => data.to_vec(),
            _ => return Err(anyhow!("Unexpected output tensor shape: {:?}", shape)),
        };
        normalize_inplace(&mut embedding);

        Ok(embedding)
    }
}

/// Load a tokenizer that truncates to `max_length` tokens, special tokens
/// included, and never pads.
///
/// Truncation and padding stored in `tokenizer.json` are replaced, so the
/// configured length can exceed the file's own cap.
pub fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer =
        Tokenizer::from_file(path).map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow!("Invalid truncation settings: {}", e))?;
    tokenizer.with_padding(None);

    Ok(tokenizer)
}

/// Local embedding client using ONNX Runtime for inference.
pub struct LocalEmbeddingClient {
    model: Arc<LocalModel>,
    config: LocalModelConfig,
}

impl LocalEmbeddingClient {
    /// Load the model and tokenizer from `config.model_dir`.
    ///
    /// Runs one warm-up inference and fails if the output width differs from
    /// `config.dimension`.
    pub fn new(config: LocalModelConfig) -> Result<Self> {
        info!("Initializing local embedding model: {}", config.model_name);

        let model_path = config.model_path();
        let tokenizer_path = config.tokenizer_path();

        if !model_path.exists() {
            return Err(anyhow!("Model file not found: {}", model_path.display()));
        }
        if !tokenizer_path.exists() {
            return Err(anyhow!(
                "Tokenizer file not found: {}",
                tokenizer_path.display()
            ));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

        info!("✓ ONNX session created for {}", config.model_name);

        let tokenizer = load_tokenizer(&tokenizer_path, config.max_length)?;

        info!("✓ Tokenizer loaded");

        let model = LocalModel {
            session: Mutex::new(session),
            tokenizer,
        };

        let probe = model.run_inference("")?;
        if probe.len() != config.dimension as usize {
            return Err(anyhow!(
                "Model {} produces {}-dimensional vectors, expected {}",
                config.model_name,
                probe.len(),
                config.dimension
            ));
        }

        Ok(Self {
            model: Arc::new(model),
            config,
        })
    }
}

#[async_trait]
impl EmbeddingClient for LocalEmbeddingClient {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = Arc::clone(&self.model);
        let text = request.text;

        let embedding = tokio::task::spawn_blocking(move || model.run_inference(&text))
            .await
            .map_err(|e| anyhow!("Inference task failed: {}", e))??;

        debug!("Generated {}-dimensional embedding", embedding.len());

        Ok(EmbeddingResponse {
            dimension: embedding.len() as u32,
            embedding,
        })
    }

    fn dimension(&self) -> u32 {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
