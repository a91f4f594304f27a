//! Temporary recording file with guaranteed removal.
//!
//! An `Artifact` deletes its file when dropped, so every exit path of
//! finalization (success, upload failure, database failure, panic unwinding)
//! cleans up without repeating manual cleanup calls.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    removed: bool,
}

impl Artifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, removed: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename stored in the upload record.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    /// Remove the file now and report the outcome instead of waiting for `Drop`.
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary artifact"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "Failed to remove temporary artifact"),
        }
    }
}
