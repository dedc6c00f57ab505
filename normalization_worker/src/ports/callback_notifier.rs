use async_trait::async_trait;
use common::helper::error_chain_fmt;

use crate::{domain::entities::callback_event::CallbackPayload, ports::object_store::BoxError};

/// Reports the progress of a job to the URL given in its message
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(
        &self,
        callback_url: &str,
        payload: &CallbackPayload,
    ) -> Result<(), CallbackDeliveryError>;
}

#[derive(thiserror::Error)]
pub enum CallbackDeliveryError {
    #[error("Callback to {url} could not be sent")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("Callback to {url} was answered with HTTP {status}")]
    Rejected { url: String, status: u16 },
}

impl std::fmt::Debug for CallbackDeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
