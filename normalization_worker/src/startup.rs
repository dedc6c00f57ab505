use std::{sync::Arc, time::Duration};

use common::{
    core::rabbitmq_message_repository::{
        RabbitMQMessageRepository, RabbitMQMessageRepositoryError,
    },
    helper::error_chain_fmt,
};
use lapin::Connection as RabbitMQConnection;
use s3::{Bucket, BucketConfiguration};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    configuration::{ObjectStorageSettings, RabbitMQSettings, Settings},
    domain::services::{
        batch_pipeline::BatchPipeline,
        converters::{GhostscriptRasterizer, ImageMagickResizer},
    },
    handlers::handler_normalization_job::{
        self, NormalizationContext, RegisterHandlerNormalizationJobError, ResultsQueue,
    },
    repositories::{
        callback_http_repository::HttpCallbackRepository,
        source_file_s3_repository::{
            credentials_from_settings, region_from_settings, S3Repository, S3RepositoryError,
        },
    },
};

/// Holds the RabbitMQ connection and the context shared by consumed jobs
pub struct Application {
    rabbitmq_consuming_connection: Arc<RabbitMQConnection>,
    queue_name: String,
    context: Arc<NormalizationContext>,
}

impl Application {
    #[tracing::instrument(name = "Building worker application")]
    pub async fn build(settings: Settings) -> Result<Self, ApplicationError> {
        let s3_bucket = set_up_s3(&settings.object_storage).await?;
        let s3_repository = Arc::new(S3Repository::try_new(
            &settings.object_storage,
            s3_bucket,
        )?);

        // One connection for consuming messages, one for publishing messages
        let rabbitmq_consuming_connection =
            Arc::new(get_rabbitmq_connection(&settings.rabbitmq).await?);

        let results = match &settings.rabbitmq.results_queue {
            Some(queue_name) => {
                let rabbitmq_publishing_connection =
                    Arc::new(get_rabbitmq_connection(&settings.rabbitmq).await?);
                let message_repository =
                    RabbitMQMessageRepository::new(rabbitmq_publishing_connection)
                        .try_init()
                        .await?;

                Some(ResultsQueue {
                    queue_name: queue_name.clone(),
                    publisher: Arc::new(message_repository),
                })
            }
            None => None,
        };

        let callback_repository = HttpCallbackRepository::try_new(Duration::from_secs(
            settings.callback.timeout_secs,
        ))?;

        let scratch_root = settings.normalization.scratch_root();
        let pipeline = BatchPipeline::new(
            s3_repository.clone(),
            Arc::new(GhostscriptRasterizer::new(
                settings.normalization.ghostscript.clone(),
            )),
            Arc::new(ImageMagickResizer::new(
                settings.normalization.imagemagick.clone(),
            )),
            settings.normalization.naming_scheme,
            scratch_root.clone(),
        );

        let context = NormalizationContext {
            object_store: s3_repository,
            callback_notifier: Arc::new(callback_repository),
            pipeline,
            scratch_root,
            default_bucket: settings.object_storage.bucket_name.clone(),
            results,
        };

        info!("🦄 Worker application built");

        Ok(Self {
            rabbitmq_consuming_connection,
            queue_name: settings.rabbitmq.queue_name,
            context: Arc::new(context),
        })
    }

    /// Consumes normalization jobs until stopped
    ///
    /// self is moved in order for the application not to drop out of scope
    ///
    /// # Parameters
    /// - `cancel_token`: stops the consumption once the job being handled, if any, is done
    pub async fn run_until_stopped(
        self,
        cancel_token: CancellationToken,
    ) -> Result<(), ApplicationError> {
        info!("📡 running until stopped");

        handler_normalization_job::register_handler(
            self.rabbitmq_consuming_connection.clone(),
            self.queue_name.clone(),
            self.context.clone(),
            cancel_token,
        )
        .await?;

        info!("👋 Bye!");
        Ok(())
    }
}

/// Create a connection to RabbitMQ
pub async fn get_rabbitmq_connection(
    config: &RabbitMQSettings,
) -> Result<RabbitMQConnection, lapin::Error> {
    RabbitMQConnection::connect(&config.get_uri(), config.get_connection_properties()).await
}

/// Sets up the S3 object storage
///
/// The configured bucket is created if it does not exist yet.
///
/// # Returns
/// An initialized bucket
#[tracing::instrument(name = "Setting up S3 object store")]
pub async fn set_up_s3(settings: &ObjectStorageSettings) -> Result<Bucket, ApplicationError> {
    let region = region_from_settings(settings);
    let credentials = credentials_from_settings(settings)?;

    // Instantiates/gets the bucket if it exists
    let bucket =
        Bucket::new(&settings.bucket_name, region.clone(), credentials.clone())?.with_path_style();

    let config = BucketConfiguration::default();

    // Checks if the bucket exist
    if let Err(error) = bucket.head_object("/").await {
        // Only continues if the error is a bucket not found (404)
        match error {
            s3::error::S3Error::Http(code, _) => {
                if code != 404 {
                    return Err(ApplicationError::S3Error(error));
                }
            }
            _ => return Err(ApplicationError::S3Error(error)),
        }

        info!(
            "🪣 Unknown bucket {}, creating it ...",
            settings.bucket_name
        );

        Bucket::create_with_path_style(&settings.bucket_name, region, credentials, config).await?;
    }

    info!(
        "🪣 Bucket {} has been correctly instantiated",
        settings.bucket_name
    );
    Ok(bucket)
}

#[derive(thiserror::Error)]
pub enum ApplicationError {
    #[error("S3 credentials error: {0}")]
    S3CredentialsError(#[from] s3::creds::error::CredentialsError),
    #[error(transparent)]
    S3Error(#[from] s3::error::S3Error),
    #[error(transparent)]
    S3RepositoryError(#[from] S3RepositoryError),
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error(transparent)]
    RabbitMQMessageRepositoryError(#[from] RabbitMQMessageRepositoryError),
    #[error("Failed to build the callback HTTP client: {0}")]
    CallbackClientError(#[from] reqwest::Error),
    #[error(transparent)]
    NormalizationJobHandlerError(#[from] RegisterHandlerNormalizationJobError),
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
