//! In-memory adapters shared by application unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pressroom_api_types::NotificationMessage;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::application::notify::{NotificationPublisher, NotifyError};
use crate::application::render::{BrowserEngine, EngineBrowser, EngineError, EnginePage};
use crate::application::repos::{
    DocumentOutcome, DocumentsRepo, DownloadTokensRepo, JobsRepo, NewJobRecord, RateLimitRepo,
    RepoError,
};
use crate::application::storage::{ObjectStore, StorageError, StoredObject};
use crate::domain::entities::{
    DocumentRecord, DownloadTokenRecord, LockoutRecord, RateWindow,
};
use crate::domain::types::{ArtifactSlot, DocumentStatus, ResourceKind};

pub fn document(kind: ResourceKind, id: i64, owner_id: i64, layout: Value) -> DocumentRecord {
    DocumentRecord {
        kind,
        id,
        owner_id,
        layout,
        status: DocumentStatus::Idle,
        pdf_key: None,
        preview_key: None,
        error_code: None,
        error_message: None,
        missing_keys: Vec::new(),
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<HashMap<(ResourceKind, i64), DocumentRecord>>,
}

impl MemoryDocuments {
    pub fn insert(&self, record: DocumentRecord) {
        self.docs
            .lock()
            .expect("documents lock")
            .insert((record.kind, record.id), record);
    }

    pub fn get(&self, kind: ResourceKind, id: i64) -> Option<DocumentRecord> {
        self.docs
            .lock()
            .expect("documents lock")
            .get(&(kind, id))
            .cloned()
    }
}

#[async_trait]
impl DocumentsRepo for MemoryDocuments {
    async fn find_document(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<DocumentRecord>, RepoError> {
        Ok(self.get(kind, id))
    }

    async fn mark_processing(
        &self,
        kind: ResourceKind,
        id: i64,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let mut docs = self.docs.lock().expect("documents lock");
        let Some(doc) = docs.get_mut(&(kind, id)) else {
            return Ok(false);
        };
        doc.status = DocumentStatus::Processing;
        doc.error_code = None;
        doc.error_message = None;
        doc.updated_at = at;
        Ok(true)
    }

    async fn revert_processing(
        &self,
        previous: &DocumentRecord,
        marked_at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let mut docs = self.docs.lock().expect("documents lock");
        let Some(doc) = docs.get_mut(&(previous.kind, previous.id)) else {
            return Ok(false);
        };
        if doc.status != DocumentStatus::Processing || doc.updated_at != marked_at {
            return Ok(false);
        }
        doc.status = previous.status;
        doc.error_code = previous.error_code;
        doc.error_message = previous.error_message.clone();
        doc.updated_at = previous.updated_at;
        Ok(true)
    }

    async fn record_outcome(
        &self,
        kind: ResourceKind,
        id: i64,
        outcome: DocumentOutcome,
        at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut docs = self.docs.lock().expect("documents lock");
        let doc = docs.get_mut(&(kind, id)).ok_or(RepoError::NotFound)?;
        match outcome {
            DocumentOutcome::Completed {
                slot,
                key,
                missing_keys,
            } => {
                doc.status = DocumentStatus::Completed;
                match slot {
                    ArtifactSlot::Pdf => doc.pdf_key = Some(key),
                    ArtifactSlot::Preview => doc.preview_key = Some(key),
                }
                doc.error_code = None;
                doc.error_message = None;
                doc.missing_keys = missing_keys;
            }
            DocumentOutcome::Failed { code, message } => {
                doc.status = DocumentStatus::Error;
                doc.error_code = Some(i32::from(code));
                doc.error_message = Some(message);
            }
        }
        doc.updated_at = at;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryJobs {
    pub enqueued: Mutex<Vec<NewJobRecord>>,
    unavailable: bool,
}

impl MemoryJobs {
    /// A queue whose every push fails as if the database were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn enqueued(&self) -> Vec<NewJobRecord> {
        self.enqueued.lock().expect("jobs lock").clone()
    }
}

#[async_trait]
impl JobsRepo for MemoryJobs {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        if self.unavailable {
            return Err(RepoError::Timeout);
        }
        let mut jobs = self.enqueued.lock().expect("jobs lock");
        jobs.push(job);
        Ok(format!("job-{}", jobs.len()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_writes: bool,
    fail_reads: bool,
}

impl MemoryStore {
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, bytes: &'static [u8], content_type: &str) {
        self.objects.lock().expect("store lock").insert(
            key.to_string(),
            StoredObject {
                bytes: Bytes::from_static(bytes),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get_bytes(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .map(|object| object.bytes.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Backend("store offline".into()));
        }
        self.objects
            .lock()
            .expect("store lock")
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Backend("bucket unavailable".to_string()));
        }
        self.objects.lock().expect("store lock").insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

/// Publisher forwarding every message into a channel the test can await.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(i64, NotificationMessage)>,
}

impl ChannelPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(i64, NotificationMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationPublisher for ChannelPublisher {
    async fn publish(
        &self,
        owner_id: i64,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError> {
        self.tx
            .send((owner_id, message.clone()))
            .map_err(|err| NotifyError::Transport(err.to_string()))
    }
}

pub async fn next_message(
    rx: &mut mpsc::UnboundedReceiver<(i64, NotificationMessage)>,
) -> (i64, NotificationMessage) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("notification within timeout")
        .expect("publisher alive")
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EngineFault {
    None,
    NavigateFails,
    CaptureFails,
}

/// Engine returning fixed artifacts and counting open sessions.
pub struct StubEngine {
    pub fault: EngineFault,
    pub open_sessions: Arc<Mutex<i64>>,
}

impl StubEngine {
    pub fn new(fault: EngineFault) -> Self {
        Self {
            fault,
            open_sessions: Arc::default(),
        }
    }
}

struct StubBrowser {
    fault: EngineFault,
    open_sessions: Arc<Mutex<i64>>,
    closed: bool,
}

struct StubPage {
    fault: EngineFault,
}

impl BrowserEngine for StubEngine {
    fn launch(&self) -> Result<Box<dyn EngineBrowser>, EngineError> {
        *self.open_sessions.lock().expect("sessions lock") += 1;
        Ok(Box::new(StubBrowser {
            fault: self.fault,
            open_sessions: Arc::clone(&self.open_sessions),
            closed: false,
        }))
    }
}

impl EngineBrowser for StubBrowser {
    fn open_page(&mut self) -> Result<Box<dyn EnginePage>, EngineError> {
        Ok(Box::new(StubPage { fault: self.fault }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            *self.open_sessions.lock().expect("sessions lock") -= 1;
        }
    }
}

impl EnginePage for StubPage {
    fn set_extra_headers(&mut self, _: &[(String, String)]) -> Result<(), EngineError> {
        Ok(())
    }

    fn add_init_script(&mut self, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn navigate(&mut self, _: &str, _: Duration) -> Result<(), EngineError> {
        if self.fault == EngineFault::NavigateFails {
            return Err(EngineError::failed("connection refused"));
        }
        Ok(())
    }

    fn wait_for_selector(&mut self, _: &str, _: Duration) -> Result<(), EngineError> {
        Ok(())
    }

    fn wait_for_fonts(&mut self, _: Duration) -> Result<(), EngineError> {
        Ok(())
    }

    fn emulate_print_media(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn remove_elements(&mut self, _: &[String]) -> Result<(), EngineError> {
        Ok(())
    }

    fn print_pdf(&mut self, _: Duration) -> Result<Vec<u8>, EngineError> {
        if self.fault == EngineFault::CaptureFails {
            return Err(EngineError::failed("Printing failed"));
        }
        Ok(b"%PDF-stub".to_vec())
    }

    fn screenshot(&mut self, _: &str, _: u32, _: Duration) -> Result<Vec<u8>, EngineError> {
        if self.fault == EngineFault::CaptureFails {
            return Err(EngineError::failed("Capture failed"));
        }
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    fn close(&mut self) {}
}

#[derive(Default)]
pub struct MemoryTokens {
    tokens: Mutex<Vec<DownloadTokenRecord>>,
}

#[async_trait]
impl DownloadTokensRepo for MemoryTokens {
    async fn insert_token(&self, record: DownloadTokenRecord) -> Result<(), RepoError> {
        self.tokens.lock().expect("tokens lock").push(record);
        Ok(())
    }

    async fn consume_token(
        &self,
        token_hash: &[u8],
        owner_id: i64,
        kind: ResourceKind,
        target_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<DownloadTokenRecord>, RepoError> {
        let mut tokens = self.tokens.lock().expect("tokens lock");
        let found = tokens.iter_mut().find(|record| {
            record.token_hash == token_hash
                && record.owner_id == owner_id
                && record.kind == kind
                && record.target_id == target_id
                && record.consumed_at.is_none()
                && record.expires_at > now
        });
        Ok(found.map(|record| {
            record.consumed_at = Some(now);
            record.clone()
        }))
    }

    async fn purge_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut tokens = self.tokens.lock().expect("tokens lock");
        let before = tokens.len();
        tokens.retain(|record| record.expires_at > now && record.consumed_at.is_none());
        Ok((before - tokens.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryRateLimits {
    windows: Mutex<HashMap<String, RateWindow>>,
    lockouts: Mutex<HashMap<String, LockoutRecord>>,
}

#[async_trait]
impl RateLimitRepo for MemoryRateLimits {
    async fn hit_window(
        &self,
        key: &str,
        window_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<RateWindow, RepoError> {
        let mut windows = self.windows.lock().expect("windows lock");
        let window = windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            window_expires_at,
        });
        if window.window_expires_at <= now {
            *window = RateWindow {
                count: 0,
                window_expires_at,
            };
        }
        window.count += 1;
        Ok(*window)
    }

    async fn load_window(&self, key: &str) -> Result<Option<RateWindow>, RepoError> {
        Ok(self.windows.lock().expect("windows lock").get(key).copied())
    }

    async fn load_lockout(&self, key: &str) -> Result<Option<LockoutRecord>, RepoError> {
        Ok(self.lockouts.lock().expect("lockouts lock").get(key).copied())
    }

    async fn record_failure(
        &self,
        key: &str,
        threshold: u32,
        locked_until: OffsetDateTime,
    ) -> Result<LockoutRecord, RepoError> {
        let mut lockouts = self.lockouts.lock().expect("lockouts lock");
        let record = lockouts.entry(key.to_string()).or_insert(LockoutRecord {
            failures: 0,
            locked_until: None,
        });
        record.failures += 1;
        if record.failures >= threshold {
            record.failures = 0;
            record.locked_until = Some(locked_until);
        }
        Ok(*record)
    }

    async fn reset_failures(&self, key: &str) -> Result<(), RepoError> {
        if let Some(record) = self.lockouts.lock().expect("lockouts lock").get_mut(key) {
            record.failures = 0;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut windows = self.windows.lock().expect("windows lock");
        let before = windows.len();
        windows.retain(|_, window| window.window_expires_at > now);
        Ok((before - windows.len()) as u64)
    }
}
