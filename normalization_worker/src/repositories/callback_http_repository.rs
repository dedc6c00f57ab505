use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::{
    domain::entities::callback_event::CallbackPayload,
    ports::callback_notifier::{CallbackDeliveryError, CallbackNotifier},
};

/// Sends job callbacks as JSON POST requests
pub struct HttpCallbackRepository {
    client: reqwest::Client,
}

impl HttpCallbackRepository {
    /// Every request is aborted after `timeout`
    pub fn try_new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackRepository {
    #[tracing::instrument(name = "Sending job callback", skip(self), fields(event = payload.event.name()))]
    async fn notify(
        &self,
        callback_url: &str,
        payload: &CallbackPayload,
    ) -> Result<(), CallbackDeliveryError> {
        let response = self
            .client
            .post(callback_url)
            .json(payload)
            .send()
            .await
            .map_err(|error| CallbackDeliveryError::Transport {
                url: callback_url.to_string(),
                source: Box::new(error),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallbackDeliveryError::Rejected {
                url: callback_url.to_string(),
                status: status.as_u16(),
            });
        }

        info!("Callback delivered with HTTP {}", status.as_u16());
        Ok(())
    }
}
