//! Scoped per-request temporary directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

const WORKSPACE_PREFIX: &str = "audio-joiner-";

/// Per-request temporary directory.
///
/// The directory and everything in it is removed when the workspace is
/// dropped, on success, error and cancellation alike.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under the system temporary directory.
    pub fn create() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(WORKSPACE_PREFIX).tempdir()?;
        debug!(path = %dir.path().display(), "Workspace created");
        Ok(Self { dir })
    }

    /// Create a workspace under `parent`.
    pub fn create_in(parent: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "Workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding inputs and output of group `index` (1-based).
    pub fn group_dir(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("group_{:03}", index))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        debug!(path = %self.dir.path().display(), "Workspace released");
    }
}
