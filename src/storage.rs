//! Object storage for artifacts and attachments.
//!
//! Keys are `{company}/{category}/{externalIdOrDate}/{filename}` with every
//! segment sanitised. Uploads are idempotent: identical existing content is
//! left alone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::utils::sanitize_segment;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// What an upload did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    Written,
    /// Identical content already stored under the key.
    Unchanged,
}

/// Destination for record artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`.
    async fn put(&self, key: &str, data: &[u8]) -> Result<UploadResult, StorageError>;

    /// Store a local file under `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<UploadResult, StorageError> {
        let data = tokio::fs::read(path).await.map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.put(key, &data).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Build an object key. Empty parts become `unknown`.
pub fn object_key(company: &str, category: &str, id_or_date: &str, filename: &str) -> String {
    [company, category, id_or_date, filename]
        .iter()
        .map(|part| {
            if part.trim().is_empty() {
                "unknown".to_string()
            } else {
                sanitize_segment(part)
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<UploadResult, StorageError> {
        let path = self.path_for(key)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };

        match tokio::fs::read(&path).await {
            Ok(existing) if sha256(&existing) == sha256(data) => {
                tracing::debug!("Object {} unchanged, skipping upload", key);
                return Ok(UploadResult::Unchanged);
            }
            Ok(_) => tracing::debug!("Object {} changed, overwriting", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        // Write to a sibling temp file so readers never see partial content.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(UploadResult::Written)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }
}
