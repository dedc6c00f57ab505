use serde::Serialize;

/// Body POSTed to the job callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub package_id: String,
    #[serde(flatten)]
    pub event: CallbackEvent,
}

/// Lifecycle events of a normalization job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallbackEvent {
    Started,
    #[serde(rename_all = "camelCase")]
    Finished {
        normalized_prefix: String,
        total_pages: usize,
        log_key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error_message: String,
        log_key: Option<String>,
    },
}

impl CallbackEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
        }
    }
}

impl CallbackPayload {
    pub fn new(package_id: &str, event: CallbackEvent) -> Self {
        Self {
            package_id: package_id.to_string(),
            event,
        }
    }
}

/// Message handed to the next stage once a batch is normalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBatchMessage {
    pub package_id: String,
    /// Prefix under which the normalized pages were uploaded
    pub input_path: String,
    pub bucket: String,
    pub total_pages: usize,
}
