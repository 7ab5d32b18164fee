//! API key provisioning.
//!
//! The key comes from `API_KEY` when set, otherwise 32 random bytes are drawn
//! from the OS generator and hex-encoded. The key is then recorded in the
//! env-config file unless an entry already exists there, so a restart picks up
//! the same key. Failing to record it is a warning, never fatal.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const API_KEY_VAR: &str = "API_KEY";

/// Number of random bytes in a generated key (64 hex characters).
pub const API_KEY_BYTES: usize = 32;

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Generated,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Environment => "environment",
            KeySource::Generated => "generated",
        }
    }
}

/// The shared secret clients must present. Formatting never reveals it.
#[derive(Clone)]
pub struct ApiKey {
    value: String,
    source: KeySource,
}

impl ApiKey {
    pub fn new(value: impl Into<String>, source: KeySource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    /// Generate a fresh key from the OS random source.
    pub fn generate() -> Self {
        Self::new(generate_api_key(), KeySource::Generated)
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Byte-for-byte comparison against a client-supplied value.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.value.as_bytes() == candidate
    }

    /// The raw secret, for persisting it.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Short SHA-256 prefix, safe to log for correlating deployments.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.value.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("source", &self.source)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted:{}>", self.fingerprint())
    }
}

/// 32 bytes from the OS CSPRNG, lowercase hex.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// `NAME=` with no value. A later entry would be shadowed by it on load.
    #[error("{path} has a blank {name} entry; fill it in or remove the line")]
    BlankEntry { path: PathBuf, name: String },
}

/// Result of a persist attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Appended,
    AlreadyRecorded,
}

/// A `.env`-style `KEY=value` file that is only ever appended to.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value recorded for `name`, if the file has an entry for it.
    pub fn recorded(&self, name: &str) -> Result<Option<String>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let entries = dotenvy::from_path_iter(&self.path).map_err(|e| self.read_error(e))?;
        for entry in entries {
            match entry {
                Ok((key, value)) if key == name => return Ok(Some(value)),
                Ok(_) => {}
                Err(e) => {
                    debug!("Unparseable entry in {}: {}", self.path.display(), e);
                    return self.scan_raw(name);
                }
            }
        }
        Ok(None)
    }

    /// Append `name=value` unless an entry for `name` already exists.
    ///
    /// Creates the file when missing. Existing entries are never rewritten; a
    /// blank existing entry is reported as [`PersistError::BlankEntry`].
    pub fn persist_if_new(&self, name: &str, value: &str) -> Result<PersistOutcome, PersistError> {
        match self.recorded(name)? {
            Some(recorded) if recorded.trim().is_empty() => {
                return Err(PersistError::BlankEntry {
                    path: self.path.clone(),
                    name: name.to_string(),
                });
            }
            Some(_) => return Ok(PersistOutcome::AlreadyRecorded),
            None => {}
        }

        let needs_newline = match fs::read(&self.path) {
            Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(self.read_error(e)),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;

        let mut line = String::new();
        if needs_newline {
            line.push('\n');
        }
        line.push_str(name);
        line.push('=');
        line.push_str(value);
        line.push('\n');

        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| self.write_error(e))?;

        Ok(PersistOutcome::Appended)
    }

    /// Line scan used when the dotenv parser gives up on the file.
    fn scan_raw(&self, name: &str) -> Result<Option<String>, PersistError> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.read_error(e))?;
        let found = content.lines().find_map(|line| {
            let line = line.trim_start();
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        });
        Ok(found)
    }

    fn read_error(&self, source: impl Into<ReadCause>) -> PersistError {
        PersistError::Read {
            path: self.path.clone(),
            source: source.into().0,
        }
    }

    fn write_error(&self, source: io::Error) -> PersistError {
        PersistError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Normalises dotenv and io failures into an io error for [`PersistError::Read`].
struct ReadCause(io::Error);

impl From<io::Error> for ReadCause {
    fn from(e: io::Error) -> Self {
        ReadCause(e)
    }
}

impl From<dotenvy::Error> for ReadCause {
    fn from(e: dotenvy::Error) -> Self {
        match e {
            dotenvy::Error::Io(io) => ReadCause(io),
            other => ReadCause(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
        }
    }
}

/// Resolve the active API key and record it for future restarts.
///
/// `from_env` is the value of `API_KEY` after the env-config file has been
/// loaded. Persistence problems are logged and otherwise ignored; the returned
/// key is always usable.
pub fn provision_api_key(from_env: Option<String>, store: &EnvFileStore) -> ApiKey {
    let key = match from_env.filter(|v| !v.is_empty()) {
        Some(value) => ApiKey::new(value, KeySource::Environment),
        None => ApiKey::generate(),
    };

    match store.persist_if_new(API_KEY_VAR, key.expose()) {
        Ok(PersistOutcome::Appended) => {
            info!("API key recorded in {}", store.path().display());
        }
        Ok(PersistOutcome::AlreadyRecorded) => {
            if let Ok(Some(recorded)) = store.recorded(API_KEY_VAR) {
                if !key.matches(recorded.as_bytes()) {
                    warn!(
                        "{} records a different {}; the {} key is in use",
                        store.path().display(),
                        API_KEY_VAR,
                        key.source().as_str()
                    );
                }
            }
        }
        Err(e) => {
            warn!(
                "Could not persist API key ({}); it will not survive a restart unless {} is set",
                e, API_KEY_VAR
            );
        }
    }

    info!(
        source = key.source().as_str(),
        fingerprint = %key.fingerprint(),
        "API key loaded"
    );

    key
}
