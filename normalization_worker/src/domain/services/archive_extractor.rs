use std::{
    fs::File,
    path::{Path, PathBuf},
};

use common::helper::error_chain_fmt;
use tracing::info;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::domain::entities::extracted_entry::ExtractedEntry;

/// Unpacks a ZIP archive into `destination` and lists the regular files it contained
///
/// Relative structure is preserved; entries whose name would escape `destination` are
/// refused by the zip crate. Files are listed depth-first, sorted by file name, so the
/// order is stable between runs on the same archive.
#[tracing::instrument(name = "Extracting archive")]
pub fn extract_archive(
    archive_path: &Path,
    destination: &Path,
) -> Result<Vec<ExtractedEntry>, ArchiveOpenError> {
    let file = File::open(archive_path).map_err(|source| ArchiveOpenError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let mut archive = ZipArchive::new(file).map_err(|source| ArchiveOpenError::InvalidArchive {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let nb_archive_entries = archive.len();

    archive
        .extract(destination)
        .map_err(|source| ArchiveOpenError::InvalidArchive {
            path: archive_path.to_path_buf(),
            source,
        })?;

    let mut entries = Vec::new();
    for dir_entry in WalkDir::new(destination).sort_by_file_name() {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type().is_file() {
            continue;
        }
        if let Some(entry) = ExtractedEntry::from_path(dir_entry.path()) {
            entries.push(entry);
        }
    }

    info!(
        "Extracted {} files from {} archive entries",
        entries.len(),
        nb_archive_entries
    );
    Ok(entries)
}

#[derive(thiserror::Error)]
pub enum ArchiveOpenError {
    #[error("Archive {path} could not be opened")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Archive {path} is not a readable ZIP archive")]
    InvalidArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("Extracted files could not be listed")]
    Listing(#[from] walkdir::Error),
}

impl std::fmt::Debug for ArchiveOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
