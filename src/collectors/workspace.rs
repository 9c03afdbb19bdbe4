use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{DiagError, Result};
use crate::security::path_validator::{mirror_path, workspace_relative_path};

/// Private temporary directory holding everything a run collects.
///
/// The directory and all of its contents are removed when the value is
/// dropped, so every exit path of a run releases it.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("wb-diag-collect.")
            .tempdir()
            .map_err(|e| DiagError::io(std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Workspace location for a configured relative name.
    pub fn resolve(&self, relative: &Path) -> anyhow::Result<PathBuf> {
        Ok(self.path().join(workspace_relative_path(relative)?))
    }

    /// Workspace location mirroring an absolute source path.
    pub fn mirror(&self, source: &Path) -> anyhow::Result<PathBuf> {
        mirror_path(self.path(), source)
    }

    /// Create a subdirectory the current phase cannot work without.
    pub fn ensure_dir(&self, relative: &str) -> Result<PathBuf> {
        let dir = self.path().join(relative);
        fs::create_dir_all(&dir).map_err(|e| DiagError::Io { path: dir.clone(), source: e })?;
        Ok(dir)
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
