use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use common::{core::rabbitmq_message_repository::QueuePublisher, helper::error_chain_fmt};
use futures::{Stream, StreamExt};
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
    Connection as RabbitMQConnection,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::{
    domain::{
        entities::{
            callback_event::{CallbackEvent, CallbackPayload, NormalizedBatchMessage},
            job_log::JobLog,
            normalization_job::NormalizationJob,
        },
        services::{
            batch_pipeline::{BatchPipeline, BatchTarget},
            scratch_workspace::{ScratchWorkspace, WorkspaceError},
        },
    },
    ports::{
        callback_notifier::{CallbackDeliveryError, CallbackNotifier},
        object_store::{DownloadError, ObjectStore},
    },
};

pub const LOG_CONTENT_TYPE: &str = "text/plain";
const ARCHIVE_FILE_NAME: &str = "archive.zip";

/// Everything a job needs, built once at start-up and shared by every consumed message
pub struct NormalizationContext {
    pub object_store: Arc<dyn ObjectStore>,
    pub callback_notifier: Arc<dyn CallbackNotifier>,
    pub pipeline: BatchPipeline,
    pub scratch_root: PathBuf,
    /// Bucket used when a message does not name one
    pub default_bucket: String,
    /// Queue receiving a message for each normalized batch, if any
    pub results: Option<ResultsQueue>,
}

pub struct ResultsQueue {
    pub queue_name: String,
    pub publisher: Arc<dyn QueuePublisher>,
}

/// Acknowledges a consumed message
#[async_trait]
pub trait DeliveryAcknowledger: Send + Sync {
    async fn acknowledge(&self) -> Result<(), lapin::Error>;
}

#[async_trait]
impl DeliveryAcknowledger for Acker {
    async fn acknowledge(&self) -> Result<(), lapin::Error> {
        self.ack(BasicAckOptions::default()).await
    }
}

/// How a consumed message ended, it is acknowledged in every case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The message could not be parsed into a job
    Discarded,
    Completed { total_pages: usize },
    Failed,
}

#[derive(thiserror::Error)]
pub enum RegisterHandlerNormalizationJobError {
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error("Consumer of queue {0} stopped without being cancelled")]
    ConsumerStopped(String),
}

impl std::fmt::Debug for RegisterHandlerNormalizationJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Consumes normalization jobs from `queue_name` until `cancel_token` is cancelled
///
/// The queue is declared durable. With a prefetch of 1, a message is fully handled
/// (callbacks sent, acknowledged) before the next one is delivered.
/// A job being handled when the token is cancelled runs to completion.
#[tracing::instrument(
    name = "Register message handler",
    skip(rabbitmq_consuming_connection, context, cancel_token)
)]
pub async fn register_handler(
    rabbitmq_consuming_connection: Arc<RabbitMQConnection>,
    queue_name: String,
    context: Arc<NormalizationContext>,
    cancel_token: CancellationToken,
) -> Result<(), RegisterHandlerNormalizationJobError> {
    let channel = rabbitmq_consuming_connection.create_channel().await?;

    channel.basic_qos(1, BasicQosOptions::default()).await?;

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let consumer_options = BasicConsumeOptions {
        no_ack: false,
        ..BasicConsumeOptions::default()
    };

    let consumer = channel
        .basic_consume(&queue_name, "", consumer_options, FieldTable::default())
        .await?;

    info!(
        "📡 Handler consuming from queue {}, waiting for messages ...",
        queue_name
    );

    consume_until_stopped(consumer, &queue_name, &context, &cancel_token).await
}

/// Handles every delivery of `deliveries`, one at a time
///
/// Returns `Ok` once `cancel_token` is cancelled. A stream ending on its own
/// (channel or connection closed by the broker) is an error.
pub async fn consume_until_stopped<S>(
    mut deliveries: S,
    queue_name: &str,
    context: &NormalizationContext,
    cancel_token: &CancellationToken,
) -> Result<(), RegisterHandlerNormalizationJobError>
where
    S: Stream<Item = Result<lapin::message::Delivery, lapin::Error>> + Unpin,
{
    loop {
        let delivery = tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Stopping consumption of queue {}", queue_name);
                return Ok(());
            }
            delivery = deliveries.next() => delivery,
        };

        let Some(delivery) = delivery else {
            error!("Consumer of queue {} stopped without being cancelled", queue_name);
            return Err(RegisterHandlerNormalizationJobError::ConsumerStopped(
                queue_name.to_string(),
            ));
        };

        async {
            match delivery {
                // Carries the delivery alongside its channel
                Ok(delivery) => {
                    let outcome = process_delivery(context, &delivery.data, &delivery.acker).await;
                    info!(?outcome, "Message handled");
                }
                // Carries the error and is always followed by the end of the stream
                Err(error) => {
                    error!(
                        ?error,
                        "Failed to consume queue message on queue {}", queue_name
                    );
                }
            }
        }
        .instrument(info_span!(
            "Handling consumed message",
            queue = queue_name,
            message_id = %uuid::Uuid::new_v4(),
        ))
        .await
    }
}

/// Handles the raw content of one message, then acknowledges it whatever happened
pub async fn process_delivery(
    context: &NormalizationContext,
    data: &[u8],
    acknowledger: &dyn DeliveryAcknowledger,
) -> MessageOutcome {
    let outcome = match NormalizationJob::try_parsing(data, &context.default_bucket) {
        Ok(job) => {
            info!(?job, "Received normalization job");
            handle_job(context, &job).await
        }
        Err(error) => {
            error!(?error, "Failed to parse normalization job message, dropping it");
            MessageOutcome::Discarded
        }
    };

    if let Err(error) = acknowledger.acknowledge().await {
        error!(?error, "Failed to ack normalization job message");
    }

    outcome
}

/// Runs a parsed job, reporting any job-level failure through the error callback
#[tracing::instrument(name = "Handling normalization job", skip(context, job), fields(package_id = %job.package_id))]
pub async fn handle_job(context: &NormalizationContext, job: &NormalizationJob) -> MessageOutcome {
    let mut job_log = JobLog::new();
    let log_key = job.log_key(Utc::now());

    match execute_handler(context, job, &mut job_log, &log_key).await {
        Ok(total_pages) => MessageOutcome::Completed { total_pages },
        Err(error) => {
            error!(?error, "Failed to handle normalization job");
            job_log.error(format!("Normalization failed: {}", error));

            let uploaded_log_key = upload_job_log(context, job, &job_log, &log_key).await;
            let payload = CallbackPayload::new(
                &job.package_id,
                CallbackEvent::Error {
                    error_message: error.to_string(),
                    log_key: uploaded_log_key,
                },
            );
            if let Err(error) = context
                .callback_notifier
                .notify(&job.callback_url, &payload)
                .await
            {
                error!(?error, "Failed to send the error callback");
            }

            MessageOutcome::Failed
        }
    }
}

#[derive(thiserror::Error)]
pub enum ExecuteHandlerNormalizationJobError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("Failed to download the archive: {0}")]
    Download(#[from] DownloadError),
    #[error("Failed to write the archive to {path}")]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No page could be normalized from the archive {archive_key}")]
    ZeroResult { archive_key: String },
    #[error(transparent)]
    CallbackDelivery(#[from] CallbackDeliveryError),
}

impl std::fmt::Debug for ExecuteHandlerNormalizationJobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Started callback, download, batch, log upload, finished callback, results hand-off
///
/// # Returns
/// The number of normalized pages
#[tracing::instrument(
    name = "Executing handler on normalization job",
    skip(context, job, job_log)
)]
pub async fn execute_handler(
    context: &NormalizationContext,
    job: &NormalizationJob,
    job_log: &mut JobLog,
    log_key: &str,
) -> Result<usize, ExecuteHandlerNormalizationJobError> {
    job_log.info(format!(
        "Starting normalization of package {} from {}/{}",
        job.package_id, job.bucket, job.archive_key
    ));

    context
        .callback_notifier
        .notify(
            &job.callback_url,
            &CallbackPayload::new(&job.package_id, CallbackEvent::Started),
        )
        .await?;

    let mut workspace = ScratchWorkspace::acquire(&context.scratch_root, "job_")?;

    let archive = context
        .object_store
        .download(&job.bucket, &job.archive_key)
        .await?;
    job_log.info(format!("Downloaded archive ({} bytes)", archive.len()));

    let archive_path = workspace.path().join(ARCHIVE_FILE_NAME);
    tokio::fs::write(&archive_path, &archive)
        .await
        .map_err(|source| ExecuteHandlerNormalizationJobError::WriteArchive {
            path: archive_path.clone(),
            source,
        })?;
    drop(archive);

    let output_prefix = job.output_prefix();
    let report = context
        .pipeline
        .process_batch(
            &archive_path,
            BatchTarget {
                bucket: &job.bucket,
                output_prefix: &output_prefix,
                package_id: &job.package_id,
            },
        )
        .await?;
    workspace.release();

    for line in report.summary_lines() {
        if line.warning {
            job_log.warn(line.text);
        } else {
            job_log.info(line.text);
        }
    }

    let total_pages = report.uploaded_pages();
    if total_pages == 0 {
        return Err(ExecuteHandlerNormalizationJobError::ZeroResult {
            archive_key: job.archive_key.clone(),
        });
    }

    job_log.info(format!(
        "Normalized {} pages under {}",
        total_pages, output_prefix
    ));
    let uploaded_log_key = upload_job_log(context, job, job_log, log_key).await;

    context
        .callback_notifier
        .notify(
            &job.callback_url,
            &CallbackPayload::new(
                &job.package_id,
                CallbackEvent::Finished {
                    normalized_prefix: output_prefix.clone(),
                    total_pages,
                    log_key: uploaded_log_key,
                },
            ),
        )
        .await?;

    publish_results(context, job, &output_prefix, total_pages).await;

    Ok(total_pages)
}

/// Uploads the job log next to the archive
///
/// # Returns
/// The key of the log, `None` if the upload failed
async fn upload_job_log(
    context: &NormalizationContext,
    job: &NormalizationJob,
    job_log: &JobLog,
    log_key: &str,
) -> Option<String> {
    match context
        .object_store
        .upload(
            &job.bucket,
            log_key,
            job_log.render().as_bytes(),
            LOG_CONTENT_TYPE,
        )
        .await
    {
        Ok(()) => {
            info!("Uploaded job log {}", log_key);
            Some(log_key.to_string())
        }
        Err(error) => {
            error!(?error, "Failed to upload job log {}", log_key);
            None
        }
    }
}

/// Hands the normalized batch over to the results queue, failures are only logged
async fn publish_results(
    context: &NormalizationContext,
    job: &NormalizationJob,
    output_prefix: &str,
    total_pages: usize,
) {
    let Some(results) = &context.results else {
        return;
    };

    let message = NormalizedBatchMessage {
        package_id: job.package_id.clone(),
        input_path: output_prefix.to_string(),
        bucket: job.bucket.clone(),
        total_pages,
    };

    let data = match serde_json::to_vec(&message) {
        Ok(data) => data,
        Err(error) => {
            error!(?error, "Failed to serialize the normalized batch message");
            return;
        }
    };

    match results
        .publisher
        .publish_to_queue(&results.queue_name, &data)
        .await
    {
        Ok(()) => info!("Published normalized batch to {}", results.queue_name),
        Err(error) => error!(
            ?error,
            "Failed to publish normalized batch to {}", results.queue_name
        ),
    }
}
