//! # Chunk Sink
//!
//! Owns the single append-only file a session records into. Messages for one
//! session are handled one at a time by its actor, so the sink is a plain
//! `&mut self` type with no internal locking.
//!
//! ## Contract:
//! - `write` appends bytes while the sink is open and returns `SinkClosed` after
//! - `finalize` flushes and closes the file; only the first call hands back the
//!   [`Artifact`], later calls return `None`

use crate::error::{AppError, AppResult};
use crate::recording::artifact::Artifact;
use crate::recording::session::SessionId;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

enum SinkState {
    Open { writer: BufWriter<File>, artifact: Artifact },
    Closed,
}

pub struct ChunkSink {
    state: SinkState,
    bytes_written: u64,
    chunks_written: u64,
}

impl ChunkSink {
    /// Create `<dir>/<session_id>.<extension>`. Fails if the file already exists.
    pub fn create(dir: &Path, session_id: &SessionId, extension: &str) -> AppResult<Self> {
        let path = dir.join(format!("{}.{}", session_id, extension.trim_start_matches('.')));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        debug!(session_id = %session_id, path = %path.display(), "Opened recording sink");

        Ok(Self {
            state: SinkState::Open {
                writer: BufWriter::new(file),
                artifact: Artifact::new(path),
            },
            bytes_written: 0,
            chunks_written: 0,
        })
    }

    /// Sink that writes into `file` and hands back `artifact_path` when finalized.
    #[cfg(test)]
    pub(crate) fn with_writer(file: File, artifact_path: std::path::PathBuf) -> Self {
        Self {
            state: SinkState::Open {
                writer: BufWriter::new(file),
                artifact: Artifact::new(artifact_path),
            },
            bytes_written: 0,
            chunks_written: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SinkState::Open { .. })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            SinkState::Open { artifact, .. } => Some(artifact.path()),
            SinkState::Closed => None,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        match &mut self.state {
            SinkState::Open { writer, .. } => {
                writer.write_all(bytes)?;
                self.bytes_written += bytes.len() as u64;
                self.chunks_written += 1;
                Ok(())
            }
            SinkState::Closed => Err(AppError::SinkClosed),
        }
    }

    /// Close the file and hand the artifact off for upload.
    ///
    /// A failed flush is logged, not fatal: whatever reached the file is still
    /// worth uploading.
    pub fn finalize(&mut self) -> Option<Artifact> {
        match std::mem::replace(&mut self.state, SinkState::Closed) {
            SinkState::Open { mut writer, artifact } => {
                if let Err(err) = writer.flush() {
                    warn!(path = %artifact.path().display(), error = %err, "Failed to flush recording");
                }
                if let Err(err) = writer.get_ref().sync_all() {
                    warn!(path = %artifact.path().display(), error = %err, "Failed to sync recording");
                }
                drop(writer);
                Some(artifact)
            }
            SinkState::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    #[test]
    fn test_write_then_finalize() {
        let dir = scratch_dir("sink");
        let id = SessionId::generate();
        let mut sink = ChunkSink::create(&dir, &id, "webm").unwrap();

        sink.write(b"chunk-1").unwrap();
        sink.write(b"chunk-22").unwrap();
        assert_eq!(sink.bytes_written(), 15);
        assert_eq!(sink.chunks_written(), 2);

        let artifact = sink.finalize().expect("first finalize yields the artifact");
        assert_eq!(artifact.filename(), format!("{}.webm", id));
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"chunk-1chunk-22");

        drop(artifact);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = scratch_dir("sink");
        let mut sink = ChunkSink::create(&dir, &SessionId::generate(), ".webm").unwrap();

        let first = sink.finalize();
        assert!(first.is_some());
        assert!(sink.finalize().is_none());
        assert!(sink.finalize().is_none());
        assert!(!sink.is_open());

        drop(first);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = scratch_dir("sink");
        let mut sink = ChunkSink::create(&dir, &SessionId::generate(), "webm").unwrap();
        sink.write(b"a").unwrap();
        let _artifact = sink.finalize();

        assert!(matches!(sink.write(b"late"), Err(AppError::SinkClosed)));
        assert_eq!(sink.bytes_written(), 1);
    }

    /// Dropping an unfinalized sink must not leave the file behind.
    #[test]
    fn test_dropped_sink_removes_file() {
        let dir = scratch_dir("sink");
        let sink = ChunkSink::create(&dir, &SessionId::generate(), "webm").unwrap();
        let path = sink.path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(sink);
        assert!(!path.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_create_fails_for_missing_dir() {
        let missing = std::env::temp_dir().join(format!("kast-missing-{}", uuid::Uuid::new_v4()));
        assert!(matches!(
            ChunkSink::create(&missing, &SessionId::generate(), "webm"),
            Err(AppError::Io(_))
        ));
    }

    /// A full disk is an I/O error, distinct from writing after close.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_is_io_error() {
        let dir = scratch_dir("sink");
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let mut sink = ChunkSink::with_writer(full, dir.join("captured.webm"));

        let err = sink.write(&vec![0u8; 64 * 1024]).unwrap_err();
        assert!(matches!(err, AppError::Io(_)), "unexpected error: {err:?}");
        assert!(sink.is_open());
        assert_eq!(sink.bytes_written(), 0);
    }
}
