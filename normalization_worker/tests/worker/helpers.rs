use std::{
    collections::HashMap,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use common::{
    core::rabbitmq_message_repository::{QueuePublisher, RabbitMQMessageRepositoryError},
    telemetry::{get_tracing_subscriber, init_tracing_subscriber},
};
use fake::Fake;
use normalization_worker::{
    domain::{
        entities::{callback_event::CallbackPayload, output_page::NamingScheme},
        services::{
            batch_pipeline::BatchPipeline,
            converters::{ConversionError, Rasterizer, Resizer},
        },
    },
    handlers::handler_normalization_job::{
        DeliveryAcknowledger, NormalizationContext, ResultsQueue,
    },
    ports::{
        callback_notifier::{CallbackDeliveryError, CallbackNotifier},
        object_store::{DownloadError, ObjectStore, UploadError},
    },
};
use once_cell::sync::Lazy;
use tempfile::TempDir;
use zip::{write::FileOptions, ZipWriter};

pub const TEST_BUCKET: &str = "test-bucket";
pub const CALLBACK_URL: &str = "http://callbacks.test/normalization";

// Ensures that the `tracing` stack is only initialized once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    // The sink is part of the type returned by `get_tracing_subscriber`: one branch per sink
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber =
            get_tracing_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        let _ = init_tracing_subscriber(subscriber);
    } else {
        let subscriber =
            get_tracing_subscriber(subscriber_name, default_filter_level, std::io::sink);
        let _ = init_tracing_subscriber(subscriber);
    };
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Random numeric package identifier, like the ones sent by the upstream service
pub fn fake_package_id() -> String {
    let id: u32 = (10_000..99_999).fake();
    format!("LOTE{}", id)
}

/// Builds a ZIP archive in memory
pub fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Writes a ZIP archive into `dir` and returns its path
pub fn write_archive(dir: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join("batch.zip");
    std::fs::write(&path, build_archive(files)).unwrap();
    path
}

/// Content understood by `FakeRasterizer` as a PDF of `pages` pages
pub fn fake_pdf(pages: usize) -> Vec<u8> {
    format!("%PDF-1.4 pages={}", pages).into_bytes()
}

/// Directories left under a scratch root
pub fn leftover_entries(scratch_root: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(scratch_root) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => vec![],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Object store keeping everything in memory
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    downloads: AtomicUsize,
    /// Number of next uploads that fail
    failing_uploads: AtomicUsize,
    /// Uploads to keys containing this fragment always fail
    failing_key_fragment: Mutex<Option<String>>,
}

impl InMemoryObjectStore {
    pub fn insert(&self, bucket: &str, key: &str, content: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content,
                content_type: "application/zip".to_string(),
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys of a bucket starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    pub fn fail_uploads_containing(&self, fragment: &str) {
        *self.failing_key_fragment.lock().unwrap() = Some(fragment.to_string());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, DownloadError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        self.get(bucket, key)
            .map(|object| object.content)
            .ok_or_else(|| DownloadError::ObjectNotFound(key.to_string()))
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError> {
        let rejected_by_fragment = self
            .failing_key_fragment
            .lock()
            .unwrap()
            .as_ref()
            .map(|fragment| key.contains(fragment.as_str()))
            .unwrap_or(false);
        let rejected_by_count = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if rejected_by_fragment || rejected_by_count {
            return Err(UploadError::UnexpectedStatus {
                key: key.to_string(),
                status: 500,
            });
        }

        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                content: content.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

/// Notifier recording every callback attempt, rejecting the configured events
#[derive(Default)]
pub struct RecordingCallbackNotifier {
    calls: Mutex<Vec<(String, CallbackPayload)>>,
    rejected_events: Mutex<Vec<&'static str>>,
}

impl RecordingCallbackNotifier {
    pub fn reject(&self, event: &'static str) {
        self.rejected_events.lock().unwrap().push(event);
    }

    pub fn calls(&self) -> Vec<(String, CallbackPayload)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .map(|(_, payload)| payload.event.name())
            .collect()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingCallbackNotifier {
    async fn notify(
        &self,
        callback_url: &str,
        payload: &CallbackPayload,
    ) -> Result<(), CallbackDeliveryError> {
        self.calls
            .lock()
            .unwrap()
            .push((callback_url.to_string(), payload.clone()));

        if self
            .rejected_events
            .lock()
            .unwrap()
            .contains(&payload.event.name())
        {
            return Err(CallbackDeliveryError::Rejected {
                url: callback_url.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

/// Resizer copying its input, failing for files whose name contains `broken`
pub struct CopyResizer;

#[async_trait]
impl Resizer for CopyResizer {
    async fn resize(&self, image_path: &Path, output_path: &Path) -> Result<(), ConversionError> {
        let stderr_log = output_path.with_file_name("resizer_error.log");
        let is_broken = image_path
            .file_name()
            .map(|name| name.to_string_lossy().contains("broken"))
            .unwrap_or(false);

        if is_broken {
            return Err(ConversionError::ExitStatus {
                tool: "magick".to_string(),
                code: Some(1),
                stderr_log,
            });
        }

        tokio::fs::copy(image_path, output_path).await.unwrap();
        Ok(())
    }
}

/// Rasterizer reading the page count from `%PDF-1.4 pages=<N>` contents
pub struct FakeRasterizer;

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let content = tokio::fs::read_to_string(pdf_path).await.unwrap_or_default();
        let pages: usize = content
            .split_once("pages=")
            .and_then(|(_, pages)| pages.trim().parse().ok())
            .unwrap_or(0);

        if pages == 0 {
            return Err(ConversionError::NoOutput {
                tool: "gs".to_string(),
                stderr_log: output_dir.join("rasterizer_error.log"),
            });
        }

        let mut paths = Vec::with_capacity(pages);
        for page in 1..=pages {
            let path = output_dir.join(format!("page_{:03}.jpg", page));
            tokio::fs::write(&path, format!("page {}", page))
                .await
                .unwrap();
            paths.push(path);
        }
        Ok(paths)
    }
}

#[derive(Default)]
pub struct RecordingAcknowledger {
    acks: AtomicUsize,
}

impl RecordingAcknowledger {
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryAcknowledger for RecordingAcknowledger {
    async fn acknowledge(&self) -> Result<(), lapin::Error> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Publisher recording the published messages, or refusing them like an idle repository
#[derive(Default)]
pub struct RecordingPublisher {
    pub messages: Mutex<Vec<(String, serde_json::Value)>>,
    pub idle: bool,
}

#[async_trait]
impl QueuePublisher for RecordingPublisher {
    async fn publish_to_queue(
        &self,
        queue_name: &str,
        data: &[u8],
    ) -> Result<(), RabbitMQMessageRepositoryError> {
        if self.idle {
            return Err(RabbitMQMessageRepositoryError::NotInitialized(
                "Cannot publish message, repository is not initialized".to_string(),
            ));
        }

        self.messages.lock().unwrap().push((
            queue_name.to_string(),
            serde_json::from_slice(data).unwrap(),
        ));
        Ok(())
    }
}

/// Pipeline and context wired to in-memory fakes, with a private scratch root
pub struct TestWorker {
    pub object_store: Arc<InMemoryObjectStore>,
    pub callback_notifier: Arc<RecordingCallbackNotifier>,
    pub scratch_dir: TempDir,
}

impl TestWorker {
    pub fn new() -> Self {
        init_tracing();

        Self {
            object_store: Arc::new(InMemoryObjectStore::default()),
            callback_notifier: Arc::new(RecordingCallbackNotifier::default()),
            scratch_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.path().join("scratch")
    }

    pub fn pipeline(&self, naming_scheme: NamingScheme) -> BatchPipeline {
        BatchPipeline::new(
            self.object_store.clone(),
            Arc::new(FakeRasterizer),
            Arc::new(CopyResizer),
            naming_scheme,
            self.scratch_root(),
        )
    }

    pub fn context(&self, results: Option<ResultsQueue>) -> NormalizationContext {
        NormalizationContext {
            object_store: self.object_store.clone(),
            callback_notifier: self.callback_notifier.clone(),
            pipeline: self.pipeline(NamingScheme::PackagePages),
            scratch_root: self.scratch_root(),
            default_bucket: TEST_BUCKET.to_string(),
            results,
        }
    }
}
