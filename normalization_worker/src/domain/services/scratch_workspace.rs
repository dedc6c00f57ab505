use std::path::{Path, PathBuf};

use common::helper::error_chain_fmt;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Private scratch directory, removed when released or dropped
///
/// Every component creating temporary files goes through this guard, so the directory is
/// removed on every exit path (early return, `?`, panic unwinding).
/// Removal is best-effort: failures are logged, never returned.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchWorkspace {
    /// Creates a uniquely named directory under `root` (created if needed)
    #[tracing::instrument(name = "Acquiring scratch workspace", level = "debug")]
    pub fn acquire(root: &Path, prefix: &str) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(root).map_err(|source| WorkspaceError {
            root: root.to_path_buf(),
            source,
        })?;

        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|source| WorkspaceError {
                root: root.to_path_buf(),
                source,
            })?;
        let path = dir.path().to_path_buf();

        debug!("Created scratch workspace {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory and everything in it
    ///
    /// Idempotent: releasing twice, or after the directory was removed by someone else, is a no-op.
    pub fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => debug!("Removed scratch workspace {}", self.path.display()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("Scratch workspace {} was already removed", self.path.display())
            }
            Err(error) => warn!(
                ?error,
                "Failed to remove scratch workspace {}",
                self.path.display()
            ),
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Removes a single file, logging instead of failing
pub fn remove_file_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            ?error,
            "Failed to remove temporary file {}",
            path.display()
        ),
    }
}

#[derive(thiserror::Error)]
#[error("Scratch workspace could not be created under {root}")]
pub struct WorkspaceError {
    pub root: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl std::fmt::Debug for WorkspaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
