//! Artifact storage for uploaded source files

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

const DEFAULT_FILENAME: &str = "artifact";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

/// Blob store; returns a locator the extractors can read back
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Delete an artifact by the locator `save` returned
    async fn remove(&self, locator: &str) -> Result<(), StorageError>;
}

/// Stores artifacts as files below a root directory
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored artifact");
        Ok(path.to_string_lossy().into_owned())
    }

    async fn remove(&self, locator: &str) -> Result<(), StorageError> {
        let path = PathBuf::from(locator);
        if !path.starts_with(&self.root) {
            return Err(StorageError::InvalidKey(locator.to_string()));
        }

        tokio::fs::remove_file(&path).await?;
        tracing::debug!(path = %path.display(), "Removed artifact");
        Ok(())
    }
}

/// Keep alphanumerics, `-`, `_` and `.`; everything else becomes `_`
pub fn safe_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = kept.trim_matches('.');
    if trimmed.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn pdf_object_key(filename: &str) -> String {
    format!("pdf/{}_{}", Uuid::new_v4(), safe_filename(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Q3 report (final).pdf"), "Q3_report__final_.pdf");
        assert_eq!(safe_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(safe_filename("..."), "artifact");
        assert_eq!(safe_filename(""), "artifact");
        assert_eq!(safe_filename("rapport-été.pdf"), "rapport-été.pdf");
    }

    #[test]
    fn test_pdf_object_key_shape() {
        let key = pdf_object_key("threat report.pdf");
        assert!(key.starts_with("pdf/"));
        assert!(key.ends_with("_threat_report.pdf"));
        let uuid_part = &key["pdf/".len().."pdf/".len() + 36];
        assert!(Uuid::parse_str(uuid_part).is_ok());
    }

    #[tokio::test]
    async fn test_local_store_writes_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let locator = store.save("pdf/abc_report.pdf", b"%PDF-1.4").await.unwrap();

        assert_eq!(std::fs::read(&locator).unwrap(), b"%PDF-1.4");
        assert!(locator.ends_with("pdf/abc_report.pdf"));
    }

    #[tokio::test]
    async fn test_local_store_removes_only_its_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let locator = store.save("pdf/abc_report.pdf", b"%PDF-1.4").await.unwrap();

        store.remove(&locator).await.unwrap();
        assert!(!std::path::Path::new(&locator).exists());

        assert!(matches!(
            store.remove("/etc/hosts").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        assert!(matches!(
            store.save("pdf/../../escape", b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
