use std::path::{Path, PathBuf};

/// How an extracted file is handled by the batch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCategory {
    Image,
    Pdf,
    Unsupported,
}

impl EntryCategory {
    /// Classifies a lowercased extension
    pub fn from_extension(extension: &str) -> Self {
        match extension {
            "jpg" | "jpeg" => Self::Image,
            "pdf" => Self::Pdf,
            _ => Self::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A regular file found in a workspace after an archive was extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub path: PathBuf,
    pub file_name: String,
    /// Lowercased, empty when the file has none
    pub extension: String,
}

impl ExtractedEntry {
    /// Returns `None` for paths without a file name (`..`, `/`)
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let extension = path
            .extension()
            .map(|extension| extension.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Some(Self {
            path: path.to_path_buf(),
            file_name,
            extension,
        })
    }

    pub fn category(&self) -> EntryCategory {
        EntryCategory::from_extension(&self.extension)
    }

    /// File name without its extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone())
    }
}
