//! Per-request scratch directory.
//!
//! Every conversion owns exactly one [`Workspace`]: the uploaded file, the
//! rasterised pages and the preprocessed images all live inside it, and the
//! whole tree is removed when the request finishes. The directory is held by a
//! [`tempfile::TempDir`], so it is removed even when the future is dropped or
//! a stage panics; [`Workspace::release`] is the explicit, logged path used on
//! normal completion.

use crate::error::StageError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const WORKSPACE_PREFIX: &str = "img2latex-";

/// An exclusively owned temporary directory.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh, uniquely named directory.
    ///
    /// With `root = None` the directory is created under the system temp dir.
    pub fn acquire(root: Option<&Path>) -> Result<Self, StageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| StageError::Resource(format!("Error creating temporary folder: {e}")))?;

        debug!("Workspace acquired: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Resolve `name` inside the workspace.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Recursively delete the directory. Failures are logged, never returned.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Workspace released: {}", path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
        }
    }
}

/// Async wrapper: create the directory on the blocking pool.
pub async fn acquire(root: Option<PathBuf>) -> Result<Workspace, StageError> {
    tokio::task::spawn_blocking(move || Workspace::acquire(root.as_deref()))
        .await
        .map_err(|e| StageError::Internal(format!("Workspace task panicked: {e}")))?
}

/// Async wrapper: delete the directory on the blocking pool.
pub async fn release(workspace: Workspace) {
    if let Err(e) = tokio::task::spawn_blocking(move || workspace.release()).await {
        warn!("Workspace cleanup task failed: {}", e);
    }
}
