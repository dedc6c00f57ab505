use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection,
};
use tracing::info;
use uuid::Uuid;

use crate::helper::error_chain_fmt;

/// AMQP delivery mode asking the broker to write the message to disk
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishes raw messages to a named durable queue
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish_to_queue(
        &self,
        queue_name: &str,
        data: &[u8],
    ) -> Result<(), RabbitMQMessageRepositoryError>;
}

/// Message repository implemented with RabbitMQ
///
/// Publishes persistent JSON messages to durable queues through the default exchange.
///
/// The enum definition gatekeeps functionalities if the repository is not ready (not initialized).
pub enum RabbitMQMessageRepository {
    Ready {
        /// RabbitMQ connection shared with other objects in different tasks
        connection: Arc<Connection>,
        /// RabbitMQ channel should not be shared between tasks, one is created per initialized repository
        channel: Channel,
    },
    Idle {
        connection: Arc<Connection>,
    },
}

/// Clones only the shareable part of the repository
///
/// The cloned repository is idle and has to be initialized again with `try_init`.
impl Clone for RabbitMQMessageRepository {
    fn clone(&self) -> Self {
        match self {
            Self::Idle { connection } | Self::Ready { connection, .. } => Self::Idle {
                connection: connection.clone(),
            },
        }
    }
}

impl RabbitMQMessageRepository {
    /// Builds an idle repository from a RabbitMQ connection
    ///
    /// No channel is opened: `try_init` should be called inside the task using the repository.
    pub fn new(connection: Arc<Connection>) -> Self {
        Self::Idle { connection }
    }

    /// Initializes the repository by opening its own RabbitMQ channel
    #[tracing::instrument(name = "🏗️ Initializing RabbitMQMessageRepository", skip(self))]
    pub async fn try_init(self) -> Result<Self, RabbitMQMessageRepositoryError> {
        match self {
            Self::Ready { .. } => {
                info!("Already initialized");
                Ok(self)
            }
            Self::Idle { connection } => {
                let channel = connection.create_channel().await?;

                Ok(Self::Ready {
                    connection,
                    channel,
                })
            }
        }
    }
}

#[async_trait]
impl QueuePublisher for RabbitMQMessageRepository {
    /// Publishes a JSON message to the given durable queue
    ///
    /// The queue is declared before publishing (idempotent). Not using publisher confirmation.
    #[tracing::instrument(name = "Publishing message to queue", skip(self, data))]
    async fn publish_to_queue(
        &self,
        queue_name: &str,
        data: &[u8],
    ) -> Result<(), RabbitMQMessageRepositoryError> {
        let channel = match self {
            Self::Idle { .. } => {
                return Err(RabbitMQMessageRepositoryError::NotInitialized(
                    "Cannot publish message, repository is not initialized".to_string(),
                ))
            }
            Self::Ready { channel, .. } => channel,
        };

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let current_time_ms = Utc::now().timestamp_millis() as u64;

        channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                data,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_timestamp(current_time_ms)
                    .with_message_id(Uuid::new_v4().to_string().into()),
            )
            .await?;

        info!("Published {} bytes to queue {}", data.len(), queue_name);
        Ok(())
    }
}

#[derive(thiserror::Error)]
pub enum RabbitMQMessageRepositoryError {
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error("{0}")]
    NotInitialized(String),
}

impl std::fmt::Debug for RabbitMQMessageRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
