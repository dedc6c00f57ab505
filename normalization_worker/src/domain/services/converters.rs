use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use common::helper::error_chain_fmt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::configuration::{GhostscriptSettings, ImageMagickSettings};

/// Name of the file receiving the stderr of the rasterizer, inside its output directory
pub const RASTERIZER_LOG_FILE: &str = "rasterizer_error.log";
/// Name of the file receiving the stderr of the resizer, next to its output file
pub const RESIZER_LOG_FILE: &str = "resizer_error.log";

/// Renders every page of a PDF as a fixed-size JPEG
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Writes one JPEG per page into `output_dir`
    ///
    /// # Returns
    /// The produced pages, in page order. Never empty on success.
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError>;
}

/// Normalizes an image into a fixed-size JPEG
#[async_trait]
pub trait Resizer: Send + Sync {
    /// Writes the normalized image at `output_path`, which exists on success
    async fn resize(&self, image_path: &Path, output_path: &Path) -> Result<(), ConversionError>;
}

/// Rasterizer running the Ghostscript `jpeg` device
pub struct GhostscriptRasterizer {
    settings: GhostscriptSettings,
}

impl GhostscriptRasterizer {
    pub fn new(settings: GhostscriptSettings) -> Self {
        Self { settings }
    }

    /// Command line arguments, pages are written as `page_001.jpg`, `page_002.jpg`...
    pub fn arguments(&self, pdf_path: &Path, output_dir: &Path) -> Vec<OsString> {
        let GhostscriptSettings {
            width,
            height,
            resolution,
            quality,
            ..
        } = &self.settings;

        let mut output_file = OsString::from("-sOutputFile=");
        output_file.push(output_dir.join("page_%03d.jpg"));

        vec![
            "-dSAFER".into(),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-sDEVICE=jpeg".into(),
            format!("-r{}", resolution).into(),
            format!("-dJPEGQ={}", quality).into(),
            format!("-g{}x{}", width, height).into(),
            output_file,
            pdf_path.into(),
        ]
    }
}

#[async_trait]
impl Rasterizer for GhostscriptRasterizer {
    #[tracing::instrument(name = "Rasterizing PDF with Ghostscript", skip(self))]
    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let stderr_log = output_dir.join(RASTERIZER_LOG_FILE);
        run_tool(
            &self.settings.binary,
            self.arguments(pdf_path, output_dir),
            &stderr_log,
        )
        .await?;

        let pages = list_pages(output_dir).map_err(|source| ConversionError::ReadOutput {
            tool: self.settings.binary.clone(),
            source,
        })?;

        if pages.is_empty() {
            return Err(ConversionError::NoOutput {
                tool: self.settings.binary.clone(),
                stderr_log,
            });
        }

        info!("Rasterized {} pages", pages.len());
        Ok(pages)
    }
}

/// Resizer running ImageMagick: scales to cover the target, then center-crops to it
pub struct ImageMagickResizer {
    settings: ImageMagickSettings,
}

impl ImageMagickResizer {
    pub fn new(settings: ImageMagickSettings) -> Self {
        Self { settings }
    }

    pub fn arguments(&self, image_path: &Path, output_path: &Path) -> Vec<OsString> {
        let ImageMagickSettings {
            width,
            height,
            quality,
            ..
        } = &self.settings;
        let geometry = format!("{}x{}", width, height);

        vec![
            image_path.into(),
            "-resize".into(),
            format!("{}^", geometry).into(),
            "-gravity".into(),
            "center".into(),
            "-extent".into(),
            geometry.into(),
            "-quality".into(),
            quality.to_string().into(),
            output_path.into(),
        ]
    }
}

#[async_trait]
impl Resizer for ImageMagickResizer {
    #[tracing::instrument(name = "Resizing image with ImageMagick", skip(self))]
    async fn resize(&self, image_path: &Path, output_path: &Path) -> Result<(), ConversionError> {
        let stderr_log = output_path.with_file_name(RESIZER_LOG_FILE);
        run_tool(
            &self.settings.binary,
            self.arguments(image_path, output_path),
            &stderr_log,
        )
        .await?;

        if !output_path.is_file() {
            return Err(ConversionError::NoOutput {
                tool: self.settings.binary.clone(),
                stderr_log,
            });
        }

        Ok(())
    }
}

/// Runs an external tool to completion, its stderr redirected to `stderr_log`
async fn run_tool(
    binary: &str,
    arguments: Vec<OsString>,
    stderr_log: &Path,
) -> Result<(), ConversionError> {
    let log_file =
        std::fs::File::create(stderr_log).map_err(|source| ConversionError::StderrLog {
            path: stderr_log.to_path_buf(),
            source,
        })?;

    let status = Command::new(binary)
        .args(&arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log_file))
        .status()
        .await
        .map_err(|source| ConversionError::Spawn {
            tool: binary.to_string(),
            source,
        })?;

    if !status.success() {
        warn!(
            "{} exited with {:?}, see {}",
            binary,
            status.code(),
            stderr_log.display()
        );
        return Err(ConversionError::ExitStatus {
            tool: binary.to_string(),
            code: status.code(),
            stderr_log: stderr_log.to_path_buf(),
        });
    }

    Ok(())
}

/// JPEG files of a directory, in page order
///
/// `page_%03d.jpg` only pads to 3 digits, so pages are ordered by their parsed number.
/// Files without a page number come last, by name.
fn list_pages(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut pages = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .map(|extension| extension.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false);

        if is_jpeg && path.is_file() {
            pages.push(path);
        }
    }
    pages.sort_by_cached_key(|path| (page_number(path).unwrap_or(u64::MAX), path.clone()));

    Ok(pages)
}

/// Number of a page written as `page_<N>.jpg`
fn page_number(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("page_")?
        .parse()
        .ok()
}

/// Failure of one converter invocation
///
/// Always absorbed by the pipeline: the file contributes no page.
#[derive(thiserror::Error)]
pub enum ConversionError {
    #[error("Could not create the stderr log {path}")]
    StderrLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not start {tool}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code:?}, see {stderr_log}")]
    ExitStatus {
        tool: String,
        code: Option<i32>,
        stderr_log: PathBuf,
    },
    #[error("{tool} did not produce any output, see {stderr_log}")]
    NoOutput { tool: String, stderr_log: PathBuf },
    #[error("Could not list the output of {tool}")]
    ReadOutput {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl std::fmt::Debug for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
