//! Model provisioning: use the local cache when present, otherwise download.
//!
//! A model is cached when its directory exists and is non-empty. Downloads land
//! in a hidden staging directory next to it and are moved in only once every
//! artifact has arrived. Provisioning runs once per process before the
//! listener binds; there is no locking against other processes sharing the
//! cache root.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Files fetched for a model: (path in the hub repository, local file name).
pub const MODEL_ARTIFACTS: &[(&str, &str)] = &[
    ("onnx/model.onnx", MODEL_FILE),
    ("tokenizer.json", TOKENIZER_FILE),
];

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}; check the model name and hub access")]
    Status { url: String, status: u16 },
}

impl ProvisioningError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ProvisioningError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Source of model artifacts.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Download every artifact of `repo_id` into the existing directory `dest`.
    async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<(), ProvisioningError>;
}

/// Staging directory used while `cache_dir` is being downloaded.
pub fn staging_dir(cache_dir: &Path) -> PathBuf {
    let name = cache_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    cache_dir.with_file_name(format!(".{}.partial", name))
}

/// `<file name>.part` next to `target`.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// True iff `path` is a directory with at least one entry.
pub fn model_exists(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Downloads artifacts from a HuggingFace-compatible hub.
pub struct HubFetcher {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HubFetcher {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn artifact_url(&self, repo_id: &str, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, repo_id, file)
    }

    async fn download(&self, url: &str, target: &Path) -> Result<u64, ProvisioningError> {
        let http_error = |source| ProvisioningError::Http {
            url: url.to_string(),
            source,
        };

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProvisioningError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let partial = partial_path(target);
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| ProvisioningError::io(&partial, e))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(http_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisioningError::io(&partial, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ProvisioningError::io(&partial, e))?;
        drop(file);

        fs::rename(&partial, target)
            .await
            .map_err(|e| ProvisioningError::io(target, e))?;

        Ok(written)
    }
}

#[async_trait]
impl ModelFetcher for HubFetcher {
    async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<(), ProvisioningError> {
        for (remote, local) in MODEL_ARTIFACTS {
            let url = self.artifact_url(repo_id, remote);
            info!("Downloading {}", url);
            let bytes = self.download(&url, &dest.join(local)).await?;
            debug!("✓ {} ({} bytes)", local, bytes);
        }
        Ok(())
    }
}

/// Check-then-download provisioning for a single model.
pub struct ModelProvisioner {
    fetcher: Arc<dyn ModelFetcher>,
}

impl ModelProvisioner {
    pub fn new(fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self { fetcher }
    }

    /// Ensure `repo_id` is available under `cache_dir` and return that directory.
    ///
    /// A cached model is used without any network access. Otherwise the
    /// directory is created, the artifacts are fetched once into
    /// [`staging_dir`] and then moved into place. On failure both directories
    /// are removed so the next start retries from scratch.
    pub async fn provision(
        &self,
        repo_id: &str,
        cache_dir: &Path,
    ) -> Result<PathBuf, ProvisioningError> {
        if model_exists(cache_dir) {
            info!("Using cached model {} at {}", repo_id, cache_dir.display());
            return Ok(cache_dir.to_path_buf());
        }

        fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| ProvisioningError::io(cache_dir, e))?;

        let staging = staging_dir(cache_dir);
        info!(
            "Model {} not cached, fetching into {}",
            repo_id,
            staging.display()
        );

        if let Err(e) = self.download_into(repo_id, cache_dir, &staging).await {
            error!("Failed to fetch model {}: {}", repo_id, e);
            for dir in [staging.as_path(), cache_dir] {
                match fs::remove_dir_all(dir).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => error!(
                        "Could not remove incomplete cache {}: {}",
                        dir.display(),
                        err
                    ),
                }
            }
            return Err(e);
        }

        info!("✓ Model {} cached at {}", repo_id, cache_dir.display());
        Ok(cache_dir.to_path_buf())
    }

    async fn download_into(
        &self,
        repo_id: &str,
        cache_dir: &Path,
        staging: &Path,
    ) -> Result<(), ProvisioningError> {
        // Leftovers of an interrupted run are discarded.
        match fs::remove_dir_all(staging).await {
            Ok(()) => debug!("Discarded stale {}", staging.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProvisioningError::io(staging, e)),
        }
        fs::create_dir_all(staging)
            .await
            .map_err(|e| ProvisioningError::io(staging, e))?;

        self.fetcher.fetch(repo_id, staging).await?;

        let mut entries = fs::read_dir(staging)
            .await
            .map_err(|e| ProvisioningError::io(staging, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProvisioningError::io(staging, e))?
        {
            let target = cache_dir.join(entry.file_name());
            fs::rename(entry.path(), &target)
                .await
                .map_err(|e| ProvisioningError::io(&target, e))?;
        }

        fs::remove_dir(staging)
            .await
            .map_err(|e| ProvisioningError::io(staging, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records fetch calls and writes placeholder artifacts.
    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<Vec<String>>,
        destinations: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    #[async_trait]
    impl ModelFetcher for RecordingFetcher {
        async fn fetch(&self, repo_id: &str, dest: &Path) -> Result<(), ProvisioningError> {
            self.calls.lock().unwrap().push(repo_id.to_string());
            self.destinations.lock().unwrap().push(dest.to_path_buf());
            // Leave something behind so cleanup is observable.
            std::fs::write(dest.join(MODEL_FILE), b"partial").unwrap();
            if self.fail {
                return Err(ProvisioningError::Status {
                    url: format!("https://hub.invalid/{}", repo_id),
                    status: 404,
                });
            }
            std::fs::write(dest.join(TOKENIZER_FILE), b"{}").unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_model_exists() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("all-MiniLM-L6-v2");
        assert!(!model_exists(&dir));

        std::fs::create_dir(&dir).unwrap();
        assert!(!model_exists(&dir));

        std::fs::write(dir.join(MODEL_FILE), b"x").unwrap();
        assert!(model_exists(&dir));
    }

    #[tokio::test]
    async fn test_empty_cache_downloads_exactly_once() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("all-MiniLM-L6-v2");
        std::fs::create_dir(&dir).unwrap();

        let fetcher = Arc::new(RecordingFetcher::default());
        let provisioner = ModelProvisioner::new(fetcher.clone());

        let path = provisioner
            .provision("sentence-transformers/all-MiniLM-L6-v2", &dir)
            .await
            .unwrap();

        assert_eq!(path, dir);
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec!["sentence-transformers/all-MiniLM-L6-v2".to_string()]
        );
        assert!(dir.join(TOKENIZER_FILE).exists());
    }

    #[tokio::test]
    async fn test_cached_model_skips_fetch() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("cached");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(MODEL_FILE), b"weights").unwrap();

        let fetcher = Arc::new(RecordingFetcher::default());
        let provisioner = ModelProvisioner::new(fetcher.clone());

        provisioner.provision("org/cached", &dir).await.unwrap();
        provisioner.provision("org/cached", &dir).await.unwrap();

        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_created() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("nested").join("model");

        let fetcher = Arc::new(RecordingFetcher::default());
        ModelProvisioner::new(fetcher.clone())
            .provision("org/model", &dir)
            .await
            .unwrap();

        assert!(model_exists(&dir));
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_propagates_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("missing-model");

        let fetcher = Arc::new(RecordingFetcher {
            fail: true,
            ..Default::default()
        });
        let err = ModelProvisioner::new(fetcher)
            .provision("org/missing-model", &dir)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Status { status: 404, .. }));
        assert!(!dir.exists());
        assert!(!staging_dir(&dir).exists());
    }

    #[tokio::test]
    async fn test_fetch_goes_through_staging() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("all-MiniLM-L6-v2");

        let fetcher = Arc::new(RecordingFetcher::default());
        ModelProvisioner::new(fetcher.clone())
            .provision("org/all-MiniLM-L6-v2", &dir)
            .await
            .unwrap();

        assert_eq!(
            *fetcher.destinations.lock().unwrap(),
            vec![root.path().join(".all-MiniLM-L6-v2.partial")]
        );
        assert!(dir.join(MODEL_FILE).exists());
        assert!(dir.join(TOKENIZER_FILE).exists());
        assert!(!staging_dir(&dir).exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_is_not_mistaken_for_cache() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("model");
        // State left by a process killed mid-download.
        std::fs::create_dir(&dir).unwrap();
        let staging = staging_dir(&dir);
        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("model.onnx.part"), b"trunc").unwrap();

        assert!(!model_exists(&dir));

        let fetcher = Arc::new(RecordingFetcher::default());
        ModelProvisioner::new(fetcher.clone())
            .provision("org/model", &dir)
            .await
            .unwrap();

        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
        assert!(!dir.join("model.onnx.part").exists());
        assert!(!staging.exists());
        assert_eq!(std::fs::read(dir.join(MODEL_FILE)).unwrap(), b"partial");
    }

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/cache/.m.partial/model.onnx")),
            PathBuf::from("/cache/.m.partial/model.onnx.part")
        );
        assert_eq!(
            staging_dir(Path::new("model/all-MiniLM-L6-v2")),
            PathBuf::from("model/.all-MiniLM-L6-v2.partial")
        );
    }

    #[test]
    fn test_artifact_url() {
        let fetcher = HubFetcher::new("https://huggingface.co/", None);
        assert_eq!(
            fetcher.artifact_url("sentence-transformers/all-MiniLM-L6-v2", "onnx/model.onnx"),
            "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx"
        );
    }
}
