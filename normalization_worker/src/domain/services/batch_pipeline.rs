use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{error, info, warn};

use crate::{
    domain::{
        entities::{
            extracted_entry::{EntryCategory, ExtractedEntry},
            output_page::{NamingScheme, PageSequence, NORMALIZED_PAGE_EXTENSION},
        },
        services::{
            archive_extractor::extract_archive,
            converters::{Rasterizer, Resizer},
            scratch_workspace::{remove_file_best_effort, ScratchWorkspace, WorkspaceError},
        },
    },
    ports::object_store::ObjectStore,
};

pub const PAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Turns one archive into uploaded, sequentially named JPEG pages
///
/// Per-file failures (unreadable archive, conversion, upload) are absorbed and reported in
/// the `BatchReport`. Only a scratch workspace that cannot be created aborts the batch.
pub struct BatchPipeline {
    object_store: Arc<dyn ObjectStore>,
    rasterizer: Arc<dyn Rasterizer>,
    resizer: Arc<dyn Resizer>,
    naming_scheme: NamingScheme,
    scratch_root: PathBuf,
}

/// Where and under which names the pages of one batch are uploaded
#[derive(Debug, Clone, Copy)]
pub struct BatchTarget<'a> {
    pub bucket: &'a str,
    pub output_prefix: &'a str,
    pub package_id: &'a str,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<EntryOutcome>,
    /// Set when the archive could not be opened or unpacked
    pub archive_error: Option<String>,
    uploaded_pages: usize,
}

#[derive(Debug)]
pub struct EntryOutcome {
    pub file_name: String,
    pub category: EntryCategory,
    /// Object names of the pages uploaded for this entry, in upload order
    pub page_names: Vec<String>,
    pub failure: Option<String>,
}

/// One line of a batch summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    /// Set for skipped or failed entries and unreadable archives
    pub warning: bool,
    pub text: String,
}

impl SummaryLine {
    fn info(text: String) -> Self {
        Self {
            warning: false,
            text,
        }
    }

    fn warning(text: String) -> Self {
        Self {
            warning: true,
            text,
        }
    }
}

impl BatchReport {
    pub fn uploaded_pages(&self) -> usize {
        self.uploaded_pages
    }

    /// Human readable lines summarizing the batch, one per entry
    pub fn summary_lines(&self) -> Vec<SummaryLine> {
        let mut lines = Vec::with_capacity(self.entries.len() + 2);

        if let Some(archive_error) = &self.archive_error {
            lines.push(SummaryLine::warning(format!(
                "Archive could not be extracted: {}",
                archive_error
            )));
        }

        for entry in &self.entries {
            let line = match (&entry.failure, entry.category) {
                (_, EntryCategory::Unsupported) => SummaryLine::warning(format!(
                    "{}: skipped, unsupported file type",
                    entry.file_name
                )),
                (Some(failure), _) => SummaryLine::warning(format!(
                    "{} ({}): {} page(s) uploaded, {}",
                    entry.file_name,
                    entry.category.as_str(),
                    entry.page_names.len(),
                    failure
                )),
                (None, _) => SummaryLine::info(format!(
                    "{} ({}): {} page(s) uploaded [{}]",
                    entry.file_name,
                    entry.category.as_str(),
                    entry.page_names.len(),
                    entry.page_names.join(", ")
                )),
            };
            lines.push(line);
        }

        lines.push(SummaryLine::info(format!(
            "Total uploaded pages: {}",
            self.uploaded_pages
        )));
        lines
    }

    fn push(&mut self, outcome: EntryOutcome) {
        self.uploaded_pages += outcome.page_names.len();
        self.entries.push(outcome);
    }
}

impl EntryOutcome {
    fn new(entry: &ExtractedEntry) -> Self {
        Self {
            file_name: entry.file_name.clone(),
            category: entry.category(),
            page_names: Vec::new(),
            failure: None,
        }
    }
}

impl BatchPipeline {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        rasterizer: Arc<dyn Rasterizer>,
        resizer: Arc<dyn Resizer>,
        naming_scheme: NamingScheme,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            object_store,
            rasterizer,
            resizer,
            naming_scheme,
            scratch_root,
        }
    }

    /// Extracts `archive_path`, normalizes every image and PDF page, uploads them under
    /// `target.output_prefix`
    ///
    /// # Returns
    /// The report of the batch, `uploaded_pages()` being the number of pages now in the
    /// object store. An archive without any convertible file gives 0 pages, not an error.
    #[tracing::instrument(name = "Processing batch", skip(self))]
    pub async fn process_batch(
        &self,
        archive_path: &Path,
        target: BatchTarget<'_>,
    ) -> Result<BatchReport, WorkspaceError> {
        let mut workspace = ScratchWorkspace::acquire(&self.scratch_root, "zip_")?;
        let mut report = BatchReport::default();

        let entries = match extract_in_background(archive_path, workspace.path()).await {
            Ok(entries) => entries,
            Err(message) => {
                error!("Failed to extract {}: {}", archive_path.display(), message);
                report.archive_error = Some(message);
                workspace.release();
                return Ok(report);
            }
        };

        let mut sequence = PageSequence::new();
        for entry in &entries {
            let outcome = match entry.category() {
                EntryCategory::Image => self.normalize_image(entry, target, &mut sequence).await?,
                EntryCategory::Pdf => self.rasterize_pdf(entry, target, &mut sequence).await?,
                EntryCategory::Unsupported => {
                    warn!("Unsupported file type, skipping {}", entry.file_name);
                    EntryOutcome::new(entry)
                }
            };
            report.push(outcome);
        }

        workspace.release();

        info!(
            "Uploaded {} pages from {} files",
            report.uploaded_pages(),
            entries.len()
        );
        Ok(report)
    }

    #[tracing::instrument(name = "Normalizing image", skip(self, entry, target, sequence), fields(file = %entry.file_name))]
    async fn normalize_image(
        &self,
        entry: &ExtractedEntry,
        target: BatchTarget<'_>,
        sequence: &mut PageSequence,
    ) -> Result<EntryOutcome, WorkspaceError> {
        let mut outcome = EntryOutcome::new(entry);
        let mut workspace = ScratchWorkspace::acquire(&self.scratch_root, "img_")?;
        let output_path = workspace
            .path()
            .join(format!("{}_norm.{}", entry.stem(), NORMALIZED_PAGE_EXTENSION));

        if let Err(e) = self.resizer.resize(&entry.path, &output_path).await {
            error!(error = ?e, "Failed to resize {}", entry.file_name);
            outcome.failure = Some(e.to_string());
            workspace.release();
            return Ok(outcome);
        }

        let name = self
            .naming_scheme
            .page_name(target.package_id, sequence.current(), &entry.extension);
        match self.upload_page(&output_path, &name, target).await {
            Ok(()) => {
                sequence.advance();
                outcome.page_names.push(name);
            }
            Err(failure) => outcome.failure = Some(failure),
        }

        remove_file_best_effort(&output_path);
        workspace.release();
        Ok(outcome)
    }

    #[tracing::instrument(name = "Rasterizing PDF", skip(self, entry, target, sequence), fields(file = %entry.file_name))]
    async fn rasterize_pdf(
        &self,
        entry: &ExtractedEntry,
        target: BatchTarget<'_>,
        sequence: &mut PageSequence,
    ) -> Result<EntryOutcome, WorkspaceError> {
        let mut outcome = EntryOutcome::new(entry);
        let mut workspace = ScratchWorkspace::acquire(&self.scratch_root, "pdf_")?;

        let pages = match self.rasterizer.rasterize(&entry.path, workspace.path()).await {
            Ok(pages) => pages,
            Err(e) => {
                error!(error = ?e, "Failed to rasterize {}", entry.file_name);
                outcome.failure = Some(e.to_string());
                workspace.release();
                return Ok(outcome);
            }
        };

        let mut failed_pages = 0;
        for page in &pages {
            let name = self.naming_scheme.page_name(
                target.package_id,
                sequence.current(),
                NORMALIZED_PAGE_EXTENSION,
            );
            match self.upload_page(page, &name, target).await {
                Ok(()) => {
                    sequence.advance();
                    outcome.page_names.push(name);
                }
                Err(_) => failed_pages += 1,
            }
            remove_file_best_effort(page);
        }

        if failed_pages > 0 {
            outcome.failure = Some(format!(
                "{} of {} pages could not be uploaded",
                failed_pages,
                pages.len()
            ));
        }

        workspace.release();
        Ok(outcome)
    }

    /// Uploads one page, the error is logged and returned as a message
    async fn upload_page(
        &self,
        page_path: &Path,
        name: &str,
        target: BatchTarget<'_>,
    ) -> Result<(), String> {
        let key = format!("{}{}", target.output_prefix, name);

        match self
            .object_store
            .upload_file(target.bucket, &key, page_path, PAGE_CONTENT_TYPE)
            .await
        {
            Ok(()) => {
                info!("Uploaded page {}", key);
                Ok(())
            }
            Err(e) => {
                error!(error = ?e, "Failed to upload page {}", key);
                Err(e.to_string())
            }
        }
    }
}

/// Archive extraction does blocking file IO, it runs off the async workers
async fn extract_in_background(
    archive_path: &Path,
    destination: &Path,
) -> Result<Vec<ExtractedEntry>, String> {
    let archive_path = archive_path.to_path_buf();
    let destination = destination.to_path_buf();

    match tokio::task::spawn_blocking(move || extract_archive(&archive_path, &destination)).await
    {
        Ok(Ok(entries)) => Ok(entries),
        Ok(Err(e)) => Err(format!("{:?}", e)),
        Err(e) => Err(format!("Extraction task failed: {}", e)),
    }
}
