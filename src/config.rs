//! Configuration module for the embeddings service.
//!
//! Every recognised option is read exactly once at startup into [`Config`].
//! The env-config file (`ENV_FILE`, default `.env`) is loaded into the process
//! environment by `main` before [`Config::from_env`] runs.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_MODEL_DIR: &str = "model";
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

/// Hub organisation bare model names resolve under.
const DEFAULT_MODEL_ORG: &str = "sentence-transformers";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Main service configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Pre-provisioned key, if any. Never printed by `Debug`.
    pub api_key: Option<String>,
    pub model_name: String,
    pub model_dir: PathBuf,
    pub model_dimension: u32,
    pub max_length: usize,
    pub inference_threads: usize,
    pub hf_endpoint: String,
    pub hf_token: Option<String>,
    pub env_file: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_name", &self.model_name)
            .field("model_dir", &self.model_dir)
            .field("model_dimension", &self.model_dimension)
            .field("max_length", &self.max_length)
            .field("inference_threads", &self.inference_threads)
            .field("hf_endpoint", &self.hf_endpoint)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .field("env_file", &self.env_file)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_key: None,
            model_name: DEFAULT_MODEL.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            model_dimension: 384,
            max_length: 256,
            inference_threads: 4,
            hf_endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            hf_token: None,
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// Unset and empty variables fall back to defaults; values that are set but
    /// fail to parse are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            api_key: get("API_KEY"),
            model_name: get("MODEL").unwrap_or(defaults.model_name),
            model_dir: get("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            model_dimension: parse_or(&get, "MODEL_DIMENSION", defaults.model_dimension)?,
            max_length: parse_or(&get, "MODEL_MAX_LENGTH", defaults.max_length)?,
            inference_threads: parse_or(&get, "INFERENCE_THREADS", defaults.inference_threads)?,
            hf_endpoint: get("HF_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or(defaults.hf_endpoint),
            hf_token: get("HF_TOKEN"),
            env_file: get("ENV_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.env_file),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model_dimension == 0 {
            return Err(ConfigError::Invalid {
                var: "MODEL_DIMENSION",
                value: "0".to_string(),
            });
        }
        if self.max_length == 0 {
            return Err(ConfigError::Invalid {
                var: "MODEL_MAX_LENGTH",
                value: "0".to_string(),
            });
        }
        if self.inference_threads == 0 {
            return Err(ConfigError::Invalid {
                var: "INFERENCE_THREADS",
                value: "0".to_string(),
            });
        }
        if self.model_name.trim_matches('/').is_empty() {
            return Err(ConfigError::Empty { var: "MODEL" });
        }
        Ok(())
    }

    /// Hub repository id for the configured model.
    pub fn repo_id(&self) -> String {
        resolve_repo_id(&self.model_name)
    }

    /// Local cache directory for the configured model.
    pub fn model_cache_dir(&self) -> PathBuf {
        model_cache_dir(&self.model_dir, &self.model_name)
    }

    /// Address the HTTP listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve a model identifier to a hub repository id.
///
/// Identifiers with an organisation prefix are kept; bare names live under
/// `sentence-transformers/`.
pub fn resolve_repo_id(model: &str) -> String {
    let model = model.trim_matches('/');
    if model.contains('/') {
        model.to_string()
    } else {
        format!("{}/{}", DEFAULT_MODEL_ORG, model)
    }
}

/// Cache directory for `model` under `root`, one directory per model name.
pub fn model_cache_dir(root: &Path, model: &str) -> PathBuf {
    root.join(model.trim_matches('/').replace('/', "--"))
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
