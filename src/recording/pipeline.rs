//! # Finalization Pipeline
//!
//! Runs once per session after its sink closed:
//! 1. **Upload**: read the artifact and pin it, obtaining a CID
//! 2. **Persist**: insert the upload record (`interrupted = !clean_finish`)
//! 3. **Notify**: tell the client `complete` (or `error`) if it is still connected
//! 4. **Cleanup**: delete the temporary artifact, whatever happened above
//! 5. **Done**: tell the connection its session is over
//!
//! Failures in steps 1 and 2 are reported and logged, never retried. A CID can
//! therefore exist remotely without a local record when the insert fails.

use crate::error::AppResult;
use crate::pinning::PinningBackend;
use crate::recording::artifact::Artifact;
use crate::recording::demux::Notification;
use crate::recording::session::RecordingSummary;
use crate::store::{MetadataStore, NewUploadRecord};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The pipeline's way back to the session it is finalizing.
pub trait ClientNotifier: Send {
    /// Deliver the final notification. Returns false when the client is no
    /// longer reachable, which is expected after an abrupt disconnect.
    fn notify(&self, notification: Notification) -> bool;

    /// Called once the artifact is gone. Returns false if the session's
    /// connection no longer exists.
    fn finished(&self) -> bool;
}

/// Result of a successful finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    pub cid: String,
    pub url: String,
    pub record_id: i64,
    pub bytes: usize,
}

#[derive(Clone)]
pub struct FinalizationPipeline {
    pinning: Arc<dyn PinningBackend>,
    store: Arc<dyn MetadataStore>,
}

impl FinalizationPipeline {
    pub fn new(pinning: Arc<dyn PinningBackend>, store: Arc<dyn MetadataStore>) -> Self {
        Self { pinning, store }
    }

    pub async fn run<N: ClientNotifier>(
        &self,
        artifact: Artifact,
        summary: RecordingSummary,
        notifier: N,
    ) -> AppResult<CompletedUpload> {
        let session_id = summary.session_id.clone();
        let result = self.upload_and_persist(&artifact, &summary).await;

        let notification = match &result {
            Ok(done) => {
                info!(
                    session_id = %session_id,
                    recorded_secs = (Utc::now() - summary.started_at).num_seconds(),
                    cid = %done.cid,
                    record_id = done.record_id,
                    bytes = done.bytes,
                    interrupted = summary.interrupted,
                    "Live recording uploaded"
                );
                Notification::Complete { cid: done.cid.clone(), url: done.url.clone() }
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "Live recording finalization failed");
                Notification::Error { message: err.to_string() }
            }
        };

        if !notifier.notify(notification) {
            debug!(session_id = %session_id, "Client already disconnected, notification dropped");
        }

        if let Err(err) = artifact.remove().await {
            warn!(session_id = %session_id, error = %err, "Failed to remove temporary artifact");
        }

        if !notifier.finished() {
            debug!(session_id = %session_id, "Session done after its connection closed");
        }

        result
    }

    async fn upload_and_persist(
        &self,
        artifact: &Artifact,
        summary: &RecordingSummary,
    ) -> AppResult<CompletedUpload> {
        let filename = artifact.filename();
        let bytes = artifact.read().await?;
        let size = bytes.len();

        let cid = self.pinning.submit(&filename, bytes).await?;
        let url = self.pinning.retrieval_url(&cid);

        let record = NewUploadRecord {
            cid: cid.to_string(),
            filename,
            user_id: summary.user_id,
            conversation_id: summary.conversation_id,
            interrupted: summary.interrupted,
            uploaded_at: Utc::now(),
        };
        let record_id = self.store.insert_upload_record(&record).await?;

        Ok(CompletedUpload {
            cid: record.cid,
            url,
            record_id,
            bytes: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::session::{FinalizeTrigger, Session, SessionId};
    use crate::recording::sink::ChunkSink;
    use crate::testing::{scratch_dir, FakePinning, FakeStore, NotificationLog};

    fn finalized_artifact(dir: &std::path::Path, payload: &[u8]) -> (Artifact, std::path::PathBuf) {
        let mut sink = ChunkSink::create(dir, &SessionId::generate(), "webm").unwrap();
        sink.write(payload).unwrap();
        let path = sink.path().unwrap().to_path_buf();
        (sink.finalize().unwrap(), path)
    }

    fn summary(trigger: FinalizeTrigger, conversation: Option<i64>) -> RecordingSummary {
        let mut session = Session::open(Some(9));
        if let Some(id) = conversation {
            session.bind_conversation(id);
        }
        session.begin_finalizing(trigger);
        session.summary()
    }

    #[tokio::test]
    async fn test_success_uploads_persists_notifies_and_cleans_up() {
        let dir = scratch_dir("pipeline-ok");
        let pinning = Arc::new(FakePinning::succeeding());
        let store = Arc::new(FakeStore::default());
        let pipeline = FinalizationPipeline::new(pinning.clone(), store.clone());
        let log = NotificationLog::default();

        let (artifact, path) = finalized_artifact(&dir, b"0123456789");
        let done = pipeline
            .run(artifact, summary(FinalizeTrigger::Done, Some(42)), log.connected())
            .await
            .unwrap();

        assert_eq!(done.bytes, 10);
        assert_eq!(pinning.submissions(), vec![b"0123456789".to_vec()]);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cid, done.cid);
        assert_eq!(records[0].conversation_id, Some(42));
        assert_eq!(records[0].user_id, Some(9));
        assert!(!records[0].interrupted);
        assert!(records[0].filename.ends_with(".webm"));

        assert_eq!(
            log.delivered(),
            vec![Notification::Complete { cid: done.cid.clone(), url: done.url.clone() }]
        );
        assert_eq!(log.finished_count(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_reports_error_and_skips_insert() {
        let dir = scratch_dir("pipeline-upload-fail");
        let pinning = Arc::new(FakePinning::failing("gateway timeout"));
        let store = Arc::new(FakeStore::default());
        let pipeline = FinalizationPipeline::new(pinning, store.clone());
        let log = NotificationLog::default();

        let (artifact, path) = finalized_artifact(&dir, b"audio");
        let result = pipeline.run(artifact, summary(FinalizeTrigger::Timeout, None), log.connected()).await;

        assert!(result.is_err());
        assert!(store.records().is_empty());
        assert!(matches!(
            log.delivered().as_slice(),
            [Notification::Error { message }] if message.contains("gateway timeout")
        ));
        assert!(!path.exists());
    }

    /// The CID exists remotely but no record is written; nothing is retried.
    #[tokio::test]
    async fn test_persist_failure_is_not_retried() {
        let dir = scratch_dir("pipeline-store-fail");
        let pinning = Arc::new(FakePinning::succeeding());
        let store = Arc::new(FakeStore::failing("database is locked"));
        let pipeline = FinalizationPipeline::new(pinning.clone(), store.clone());
        let log = NotificationLog::default();

        let (artifact, path) = finalized_artifact(&dir, b"audio");
        let result = pipeline.run(artifact, summary(FinalizeTrigger::Done, None), log.connected()).await;

        assert!(result.is_err());
        assert_eq!(pinning.submissions().len(), 1);
        assert_eq!(store.attempts(), 1);
        assert!(matches!(log.delivered().as_slice(), [Notification::Error { .. }]));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_disconnected_client_still_persists_and_cleans_up() {
        let dir = scratch_dir("pipeline-gone");
        let pinning = Arc::new(FakePinning::succeeding());
        let store = Arc::new(FakeStore::default());
        let pipeline = FinalizationPipeline::new(pinning, store.clone());
        let log = NotificationLog::default();

        let (artifact, path) = finalized_artifact(&dir, b"partial");
        let result = pipeline
            .run(artifact, summary(FinalizeTrigger::Disconnect, None), log.disconnected())
            .await;

        assert!(result.is_ok());
        assert_eq!(store.records().len(), 1);
        assert!(store.records()[0].interrupted);
        assert!(log.delivered().is_empty());
        assert_eq!(log.finished_count(), 0);
        assert!(!path.exists());
    }

    /// Records whether the artifact still existed at each callback.
    struct ArtifactWitness {
        path: std::path::PathBuf,
        seen: Arc<std::sync::Mutex<Vec<(&'static str, bool)>>>,
    }

    impl ClientNotifier for ArtifactWitness {
        fn notify(&self, _notification: Notification) -> bool {
            self.seen.lock().unwrap().push(("notify", self.path.exists()));
            true
        }

        fn finished(&self) -> bool {
            self.seen.lock().unwrap().push(("finished", self.path.exists()));
            true
        }
    }

    #[tokio::test]
    async fn test_notify_before_delete_and_done_after() {
        let dir = scratch_dir("pipeline-order");
        let pipeline = FinalizationPipeline::new(Arc::new(FakePinning::succeeding()), Arc::new(FakeStore::default()));

        let (artifact, path) = finalized_artifact(&dir, b"ordered");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let witness = ArtifactWitness { path, seen: seen.clone() };

        pipeline
            .run(artifact, summary(FinalizeTrigger::Done, None), witness)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("notify", true), ("finished", false)]);
    }
}
