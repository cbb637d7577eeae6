//! Per-call workspace directories
//!
//! Every judge call gets a fresh directory that is removed before the call
//! returns, whichever way it ends.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxError;

/// A disposable working directory for one invocation
///
/// The directory is deleted when the workspace is dropped. Call
/// [`close()`](Self::close) to observe removal errors instead of only logging them.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a new workspace under `root`, or the system temp dir
    #[instrument]
    pub fn create(root: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("capsule-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "workspace created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Get the path to the workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the host path to a file inside the workspace
    ///
    /// Returns an error if the name tries to escape the workspace.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Read a file from the workspace
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    /// Remove the workspace directory now
    pub fn close(mut self) -> Result<(), SandboxError> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
            debug!(path = %self.path.display(), "workspace removed");
        }
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
        }
    }
}
