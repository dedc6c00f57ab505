use async_trait::async_trait;
use common::helper::error_chain_fmt;
use s3::{creds::Credentials, Bucket, Region};
use secrecy::ExposeSecret;
use tracing::info;

use crate::{
    configuration::ObjectStorageSettings,
    ports::object_store::{DownloadError, ObjectStore, UploadError},
};

/// Simple Storage Service (S3) client reading archives and storing normalized pages
///
/// Jobs may name another bucket than the configured one: buckets are then built on demand
/// from the same endpoint and credentials, with path-style addressing.
pub struct S3Repository {
    region: Region,
    credentials: Credentials,
    default_bucket_name: String,
    default_bucket: Bucket,
}

#[derive(thiserror::Error)]
pub enum S3RepositoryError {
    #[error("Credentials error: {0}")]
    CredentialsError(#[from] s3::creds::error::CredentialsError),
    #[error(transparent)]
    Other(#[from] s3::error::S3Error),
}

impl std::fmt::Debug for S3RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl S3Repository {
    pub fn try_new(
        settings: &ObjectStorageSettings,
        default_bucket: Bucket,
    ) -> Result<Self, S3RepositoryError> {
        Ok(Self {
            region: region_from_settings(settings),
            credentials: credentials_from_settings(settings)?,
            default_bucket_name: settings.bucket_name.clone(),
            default_bucket,
        })
    }

    fn bucket(&self, bucket_name: &str) -> Result<Bucket, S3RepositoryError> {
        if bucket_name == self.default_bucket_name {
            return Ok(self.default_bucket.clone());
        }

        let bucket = Bucket::new(bucket_name, self.region.clone(), self.credentials.clone())?
            .with_path_style();
        Ok(bucket)
    }
}

#[async_trait]
impl ObjectStore for S3Repository {
    /// Gets a file from a bucket in the object storage
    #[tracing::instrument(name = "Get file from bucket", skip(self))]
    async fn download(&self, bucket_name: &str, key: &str) -> Result<Vec<u8>, DownloadError> {
        let bucket = self
            .bucket(bucket_name)
            .map_err(|error| DownloadError::Backend(Box::new(error)))?;

        let response = bucket.get_object(key).await.map_err(|error| match error {
            s3::error::S3Error::Http(404, _) => DownloadError::ObjectNotFound(key.to_string()),
            _ => DownloadError::Backend(Box::new(error)),
        })?;

        let status = response.status_code();
        info!("🦄 Get from bucket response: {}", status);

        match status {
            200..=299 => Ok(response.bytes().to_vec()),
            404 => Err(DownloadError::ObjectNotFound(key.to_string())),
            _ => Err(DownloadError::UnexpectedStatus {
                key: key.to_string(),
                status,
            }),
        }
    }

    /// Saves content at the given key, overwriting any previous object
    #[tracing::instrument(name = "Put file into bucket", skip(self, content))]
    async fn upload(
        &self,
        bucket_name: &str,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError> {
        let bucket = self
            .bucket(bucket_name)
            .map_err(|error| UploadError::Backend(Box::new(error)))?;

        let response = bucket
            .put_object_with_content_type(key, content, content_type)
            .await
            .map_err(|error| UploadError::Backend(Box::new(error)))?;

        let status = response.status_code();
        if !(200..=299).contains(&status) {
            return Err(UploadError::UnexpectedStatus {
                key: key.to_string(),
                status,
            });
        }

        Ok(())
    }
}

pub fn region_from_settings(settings: &ObjectStorageSettings) -> Region {
    Region::Custom {
        region: settings.region.to_owned(),
        endpoint: settings.endpoint(),
    }
}

pub fn credentials_from_settings(
    settings: &ObjectStorageSettings,
) -> Result<Credentials, s3::creds::error::CredentialsError> {
    Credentials::new(
        Some(&settings.username),
        Some(settings.password.expose_secret()),
        None,
        None,
        None,
    )
}
