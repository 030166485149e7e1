//! Secret backends
//!
//! Token material and application credentials live in a versioned secret
//! store. Reads always return the latest version; writes append a new one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Invalid secret id: {0}")]
    InvalidId(String),

    #[error("Secret IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Versioned secret storage
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Latest version of the secret
    async fn get_secret(&self, id: &str) -> Result<Vec<u8>, SecretError>;

    /// Append a new version of the secret
    async fn put_secret_version(&self, id: &str, payload: &[u8]) -> Result<(), SecretError>;
}

fn check_id(id: &str) -> Result<(), SecretError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(SecretError::InvalidId(id.to_string()))
    }
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Stores each secret as a directory of numbered version files,
/// `<root>/<id>/1`, `<root>/<id>/2`, ...
#[derive(Debug, Clone)]
pub struct FsSecretBackend {
    root: PathBuf,
}

impl FsSecretBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn latest_version(dir: &Path) -> Result<Option<u64>, SecretError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest = None;
        while let Some(entry) = entries.next_entry().await? {
            let version = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok());
            if let Some(v) = version {
                latest = latest.max(Some(v));
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl SecretBackend for FsSecretBackend {
    #[instrument(skip(self))]
    async fn get_secret(&self, id: &str) -> Result<Vec<u8>, SecretError> {
        check_id(id)?;
        let dir = self.root.join(id);
        let version = Self::latest_version(&dir)
            .await?
            .ok_or_else(|| SecretError::NotFound(id.to_string()))?;

        debug!(version, "Reading secret version");
        Ok(tokio::fs::read(dir.join(version.to_string())).await?)
    }

    #[instrument(skip(self, payload))]
    async fn put_secret_version(&self, id: &str, payload: &[u8]) -> Result<(), SecretError> {
        check_id(id)?;
        let dir = self.root.join(id);
        tokio::fs::create_dir_all(&dir).await?;

        let version = Self::latest_version(&dir).await?.unwrap_or(0) + 1;
        let tmp = dir.join(format!(".{}.tmp", version));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, dir.join(version.to_string())).await?;

        debug!(version, bytes = payload.len(), "Stored secret version");
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Versioned in-memory secrets with read/write counters
#[derive(Debug, Default)]
pub struct MemorySecretBackend {
    secrets: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    refuse_writes: AtomicBool,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret without counting it as a write
    pub fn with_secret(self, id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.into())
            .or_default()
            .push(payload.into());
        self
    }

    /// Make every subsequent write fail with an IO error
    pub fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn version_count(&self, id: &str) -> usize {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(0, Vec::len)
    }

    pub fn latest(&self, id: &str) -> Option<Vec<u8>> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|versions| versions.last().cloned())
    }
}

#[async_trait]
impl SecretBackend for MemorySecretBackend {
    async fn get_secret(&self, id: &str) -> Result<Vec<u8>, SecretError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.latest(id)
            .ok_or_else(|| SecretError::NotFound(id.to_string()))
    }

    async fn put_secret_version(&self, id: &str, payload: &[u8]) -> Result<(), SecretError> {
        check_id(id)?;
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(SecretError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("write refused for {}", id),
            )));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }
}
