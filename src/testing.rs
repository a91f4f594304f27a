//! In-memory doubles for the pinning service and metadata store, shared by
//! the pipeline and WebSocket tests.

use crate::error::{AppError, AppResult};
use crate::pinning::{ContentId, PinningBackend};
use crate::recording::demux::Notification;
use crate::recording::pipeline::ClientNotifier;
use crate::store::{MetadataStore, NewUploadRecord, UploadRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kast-{}-{}", label, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub struct FakePinning {
    submissions: Mutex<Vec<Vec<u8>>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl FakePinning {
    pub fn succeeding() -> Self {
        Self { submissions: Mutex::new(Vec::new()), failure: None, delay: None }
    }

    pub fn failing(message: &str) -> Self {
        Self { failure: Some(message.to_string()), ..Self::succeeding() }
    }

    /// Every upload takes `delay` before it answers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PinningBackend for FakePinning {
    async fn submit(&self, _filename: &str, bytes: Vec<u8>) -> AppResult<ContentId> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(bytes);
        match &self.failure {
            Some(message) => Err(AppError::Pinning(message.clone())),
            None => Ok(ContentId::new(format!("QmFake{}", submissions.len()))),
        }
    }

    fn retrieval_url(&self, cid: &ContentId) -> String {
        format!("https://gateway.test/ipfs/{}", cid)
    }
}

#[derive(Default)]
pub struct FakeStore {
    records: Mutex<Vec<NewUploadRecord>>,
    attempts: AtomicUsize,
    failure: Option<String>,
}

impl FakeStore {
    pub fn failing(message: &str) -> Self {
        Self { failure: Some(message.to_string()), ..Self::default() }
    }

    pub fn records(&self) -> Vec<NewUploadRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FakeStore {
    async fn insert_upload_record(&self, record: &NewUploadRecord) -> AppResult<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(AppError::Storage(message.clone()));
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(records.len() as i64)
    }

    async fn latest_upload(&self) -> AppResult<Option<UploadRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.last().map(|r| UploadRecord {
            id: records.len() as i64,
            cid: r.cid.clone(),
            filename: Some(r.filename.clone()),
            user_id: r.user_id,
            conversation_id: r.conversation_id,
            interrupted: r.interrupted,
            uploaded_at: r.uploaded_at.to_rfc3339(),
        }))
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Records what a pipeline tried to tell its client.
#[derive(Clone, Default)]
pub struct NotificationLog {
    delivered: Arc<Mutex<Vec<Notification>>>,
    finished: Arc<AtomicUsize>,
}

pub struct LogNotifier {
    log: NotificationLog,
    connected: bool,
}

impl NotificationLog {
    pub fn connected(&self) -> LogNotifier {
        LogNotifier { log: self.clone(), connected: true }
    }

    pub fn disconnected(&self) -> LogNotifier {
        LogNotifier { log: self.clone(), connected: false }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ClientNotifier for LogNotifier {
    fn notify(&self, notification: Notification) -> bool {
        if self.connected {
            self.log.delivered.lock().unwrap().push(notification);
        }
        self.connected
    }

    fn finished(&self) -> bool {
        if self.connected {
            self.log.finished.fetch_add(1, Ordering::SeqCst);
        }
        self.connected
    }
}
