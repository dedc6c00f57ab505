use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::helper::error_chain_fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Download-by-key and upload-by-key operations on buckets of an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, DownloadError>;

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError>;

    /// Uploads the content of a local file
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| UploadError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;

        self.upload(bucket, key, &content, content_type).await
    }
}

#[derive(thiserror::Error)]
pub enum DownloadError {
    #[error("The object could not be found in the bucket: {0}")]
    ObjectNotFound(String),
    #[error("The object store answered {status} when downloading {key}")]
    UnexpectedStatus { key: String, status: u16 },
    #[error("The object store request failed")]
    Backend(#[source] BoxError),
}

impl std::fmt::Debug for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum UploadError {
    #[error("Local file {path} could not be read")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("The object store answered {status} when uploading {key}")]
    UnexpectedStatus { key: String, status: u16 },
    #[error("The object store request failed")]
    Backend(#[source] BoxError),
}

impl std::fmt::Debug for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
