//! Blob storage for raw uploaded files.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob at the given path.
    #[error("Blob {0} not found")]
    NotFound(String),
    /// Underlying I/O failure.
    #[error("Blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a stored blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Store-relative path used for later download or delete.
    pub path: String,
    /// Number of bytes stored.
    pub size: u64,
}

/// Opaque storage for raw file bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores bytes under a folder, returning the blob's path.
    async fn upload(
        &self,
        bytes: &[u8],
        folder: &str,
        filename: &str,
    ) -> Result<StoredBlob, StorageError>;

    /// Reads a previously stored blob.
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes a blob; missing blobs are not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Blob store rooted in a local directory.
///
/// Stored names are prefixed with a fresh UUID so repeated uploads of the
/// same file never collide.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`; directories are created lazily.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

/// Keeps stored names safe regardless of what the client called the file.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        bytes: &[u8],
        folder: &str,
        filename: &str,
    ) -> Result<StoredBlob, StorageError> {
        let folder = sanitize_name(folder);
        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_name(filename));
        let relative = format!("{folder}/{stored_name}");

        tokio::fs::create_dir_all(self.root.join(&folder)).await?;
        tokio::fs::write(self.resolve(&relative), bytes).await?;

        tracing::debug!(path = %relative, size = bytes.len(), "Stored blob");
        Ok(StoredBlob {
            path: relative,
            size: bytes.len() as u64,
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(error) => Err(StorageError::Io(error)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StorageError::Io(error)),
        }
    }
}
