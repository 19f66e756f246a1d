//! Per-job scratch directory
//!
//! Removed when the workspace is dropped, whether the job succeeded, failed,
//! timed out or was cancelled.

use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    /// Create a fresh directory under `root` (system temp dir when `None`)
    pub fn create(root: Option<&Path>, job_id: &str) -> io::Result<Self> {
        let prefix = format!("genmedia-{job_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Job workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures instead of ignoring them
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().inspect_err(|e| {
            warn!("Failed to remove job workspace {}: {}", path.display(), e);
        })
    }
}
