//! Persisting uploaded files.
//!
//! Files are written verbatim to `<upload_dir>/<file_name>`. A second upload
//! under the same name overwrites the first; no manifest is kept.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::error::UploadError;
use crate::models::UploadedDocument;

/// Writes uploads into a single configured directory.
#[derive(Debug, Clone)]
pub struct Uploader {
    directory: PathBuf,
    max_bytes: Option<usize>,
}

impl Uploader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_bytes: None,
        }
    }

    /// Reject uploads larger than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub async fn save(&self, doc: &UploadedDocument) -> Result<PathBuf, UploadError> {
        self.save_bytes(&doc.name, &doc.bytes).await
    }

    /// Write `content` under `file_name`, returning the storage path.
    pub async fn save_bytes(&self, file_name: &str, content: &[u8]) -> Result<PathBuf, UploadError> {
        validate_file_name(file_name)?;

        if let Some(limit) = self.max_bytes {
            if content.len() > limit {
                return Err(UploadError::TooLarge {
                    size: content.len(),
                    limit,
                });
            }
        }

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| UploadError::Io {
                path: self.directory.clone(),
                source,
            })?;

        let path = self.directory.join(file_name);
        debug!("Writing {} bytes to {}", content.len(), path.display());
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;

        info!(file = %file_name, bytes = content.len(), "Saved upload");
        Ok(path)
    }
}

/// A storable name is exactly one normal path component.
pub fn validate_file_name(file_name: &str) -> Result<(), UploadError> {
    if file_name.trim().is_empty() {
        return Err(UploadError::EmptyName);
    }
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains('\0') {
        return Err(UploadError::InvalidName(file_name.to_string()));
    }
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(UploadError::InvalidName(file_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_writes_file_under_directory() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(tmp.path());
        let path = uploader.save_bytes("report.pdf", b"%PDF-1.4").await.unwrap();
        assert_eq!(path, tmp.path().join("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn second_upload_overwrites() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(tmp.path());
        uploader.save_bytes("report.pdf", b"first").await.unwrap();
        let path = uploader.save_bytes("report.pdf", b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(tmp.path().join("nested/uploads"));
        let path = uploader.save_bytes("a.pdf", b"x").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn rejects_empty_and_traversal_names() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(tmp.path());
        assert!(matches!(
            uploader.save_bytes("", b"x").await,
            Err(UploadError::EmptyName)
        ));
        for name in ["../evil.pdf", "a/b.pdf", "..", ".", "c:\\x.pdf"] {
            assert!(
                matches!(
                    uploader.save_bytes(name, b"x").await,
                    Err(UploadError::InvalidName(_))
                ),
                "{} should be rejected",
                name
            );
        }
    }

    #[tokio::test]
    async fn rejects_oversize_upload() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(tmp.path()).with_max_bytes(4);
        let err = uploader.save_bytes("big.pdf", b"12345").await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size: 5, limit: 4 }));
        assert!(!tmp.path().join("big.pdf").exists());
    }

    #[tokio::test]
    async fn unwritable_target_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let uploader = Uploader::new(&blocker);
        let err = uploader.save_bytes("a.pdf", b"x").await.unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
