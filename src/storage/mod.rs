//! # Content Storage
//!
//! Uploaded file content lives outside the database; uploads carry an
//! opaque `storage_ref` naming their content. The `ContentStore` trait is
//! the seam the ingestion pipeline reads through, with a local-filesystem
//! implementation for single-host deployments and tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::StorageConfig;

/// Errors from content storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No content stored under reference '{storage_ref}'")]
    NotFound { storage_ref: String },

    #[error("Invalid storage reference '{storage_ref}': {reason}")]
    InvalidReference { storage_ref: String, reason: String },

    #[error("Storage I/O failed for '{storage_ref}': {source}")]
    Io {
        storage_ref: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Whether a retry with backoff is worthwhile. Missing content and
    /// malformed references never heal on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io { .. })
    }
}

impl From<StorageError> for crate::error::CoreError {
    fn from(error: StorageError) -> Self {
        crate::error::CoreError::StorageError(error.to_string())
    }
}

/// Read seam between the ingestion pipeline and wherever content lives
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// All physical lines of the stored content, in file order
    async fn read_lines(&self, storage_ref: &str) -> Result<Vec<String>, StorageError>;

    /// Whether content exists under the reference
    async fn exists(&self, storage_ref: &str) -> Result<bool, StorageError>;

    /// Store content under the reference, replacing any prior content
    async fn store(&self, storage_ref: &str, content: &[u8]) -> Result<(), StorageError>;
}

/// Filesystem-backed content store rooted at a configured directory
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root)
    }

    /// Map a storage reference onto a path under the root. References are
    /// relative paths; anything absolute or escaping upward is rejected.
    fn resolve(&self, storage_ref: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(storage_ref);
        if relative.is_absolute() {
            return Err(StorageError::InvalidReference {
                storage_ref: storage_ref.to_string(),
                reason: "absolute paths are not valid references".to_string(),
            });
        }
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StorageError::InvalidReference {
                storage_ref: storage_ref.to_string(),
                reason: "references must stay under the storage root".to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn read_lines(&self, storage_ref: &str) -> Result<Vec<String>, StorageError> {
        let path = self.resolve(storage_ref)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    storage_ref: storage_ref.to_string(),
                })
            }
            Err(e) => {
                return Err(StorageError::Io {
                    storage_ref: storage_ref.to_string(),
                    source: e,
                })
            }
        };

        debug!(
            storage_ref = storage_ref,
            bytes = content.len(),
            "Read stored content"
        );

        Ok(content.lines().map(str::to_string).collect())
    }

    async fn exists(&self, storage_ref: &str) -> Result<bool, StorageError> {
        let path = self.resolve(storage_ref)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Io {
                storage_ref: storage_ref.to_string(),
                source: e,
            })?)
    }

    async fn store(&self, storage_ref: &str, content: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(storage_ref)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io {
                    storage_ref: storage_ref.to_string(),
                    source: e,
                })?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StorageError::Io {
                storage_ref: storage_ref.to_string(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::new(dir.path());

        store
            .store("2022/11/settle.tddf", b"line one\r\nline two\nline three")
            .await
            .unwrap();

        assert!(store.exists("2022/11/settle.tddf").await.unwrap());
        let lines = store.read_lines("2022/11/settle.tddf").await.unwrap();
        assert_eq!(lines, vec!["line one", "line two", "line three"]);
    }

    #[tokio::test]
    async fn test_missing_reference_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::new(dir.path());

        let err = store.read_lines("nowhere.tddf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_escaping_references_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::new(dir.path());

        let err = store.read_lines("../outside.tddf").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidReference { .. }));

        let err = store.read_lines("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidReference { .. }));
    }
}
