use chrono::{DateTime, Utc};
use common::helper::error_chain_fmt;
use serde::Deserialize;

/// Package identifiers are sent either as strings or as numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PackageId {
    Text(String),
    Number(i64),
}

impl PackageId {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Message as published on the queue, before its required fields are checked
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NormalizationJobMessage {
    #[serde(alias = "zipKey")]
    archive_key: Option<String>,
    bucket: Option<String>,
    #[serde(alias = "nomeLote")]
    package_id: Option<PackageId>,
    callback_url: Option<String>,
    client: Option<String>,
    domain: Option<String>,
}

/// A request to normalize every page of an archive stored in the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationJob {
    /// Key of the ZIP archive in `bucket`
    pub archive_key: String,
    pub bucket: String,
    pub package_id: String,
    /// Receives the started / finished / error events
    pub callback_url: String,
    /// Overrides the first segment of the archive key in the output prefix
    pub client: Option<String>,
    /// Overrides the second segment of the archive key in the output prefix
    pub domain: Option<String>,
}

impl NormalizationJob {
    /// Parses a queue message
    ///
    /// Empty strings count as missing. The bucket falls back to `default_bucket`.
    pub fn try_parsing(
        data: &[u8],
        default_bucket: &str,
    ) -> Result<Self, NormalizationJobParsingError> {
        let data = std::str::from_utf8(data)?;
        let message: NormalizationJobMessage = serde_json::from_str(data)
            .map_err(|e| NormalizationJobParsingError::InvalidJsonData(e, data.to_string()))?;

        let archive_key = non_empty(message.archive_key)
            .ok_or(NormalizationJobParsingError::MissingField("archiveKey"))?;
        let package_id = non_empty(message.package_id.map(PackageId::into_string))
            .ok_or(NormalizationJobParsingError::MissingField("packageId"))?;
        let callback_url = non_empty(message.callback_url)
            .ok_or(NormalizationJobParsingError::MissingField("callbackUrl"))?;
        let bucket = non_empty(message.bucket).unwrap_or_else(|| default_bucket.to_string());

        Ok(Self {
            archive_key,
            bucket,
            package_id,
            callback_url,
            client: non_empty(message.client),
            domain: non_empty(message.domain),
        })
    }

    /// Directory part of the archive key, empty when the archive is at the bucket root
    pub fn archive_dir(&self) -> &str {
        self.archive_key
            .rsplit_once('/')
            .map(|(dir, _)| dir.trim_end_matches('/'))
            .unwrap_or("")
    }

    /// Key prefix of the normalized pages: `<client>/<domain>/normalized/<package-id>/`
    ///
    /// Client and domain default to the first two directories of the archive key and are
    /// left out when neither the job nor the key provides them.
    pub fn output_prefix(&self) -> String {
        let directories: Vec<&str> = self
            .archive_dir()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let client = self
            .client
            .clone()
            .or_else(|| directories.first().map(|s| s.to_string()));
        let domain = self
            .domain
            .clone()
            .or_else(|| directories.get(1).map(|s| s.to_string()));

        let segments: Vec<String> = client
            .into_iter()
            .chain(domain)
            .chain(["normalized".to_string(), self.package_id.clone()])
            .collect();

        format!("{}/", segments.join("/"))
    }

    /// Key of the job log artifact: `<archive-dir>/logs/normalization_<package-id>_<time>.log`
    pub fn log_key(&self, at: DateTime<Utc>) -> String {
        let file_name = format!(
            "normalization_{}_{}.log",
            self.package_id,
            at.format("%Y%m%d_%H%M%S")
        );

        match self.archive_dir() {
            "" => format!("logs/{}", file_name),
            dir => format!("{}/logs/{}", dir, file_name),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(thiserror::Error)]
pub enum NormalizationJobParsingError {
    #[error("Data could not be converted from utf8 u8 vector to string")]
    InvalidStringData(#[from] std::str::Utf8Error),

    #[error("Data did not represent a valid JSON object: {0}. Data: {1}")]
    InvalidJsonData(serde_json::Error, String),

    #[error("Required field `{0}` is missing or empty")]
    MissingField(&'static str),
}

impl std::fmt::Debug for NormalizationJobParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
