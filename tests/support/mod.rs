#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use pressroom::application::auth::{SessionClaims, SessionVerifier};
use pressroom::application::download_tokens::DownloadTokenService;
use pressroom::application::generation::GenerationService;
use pressroom::application::notify::NotificationSubscriber;
use pressroom::application::rate_limit::{LockoutPolicy, LoginThrottle, RateLimiter, RateLimits};
use pressroom::application::render::{BrowserEngine, EngineBrowser, EngineError, EnginePage};
use pressroom::application::repos::{
    DocumentOutcome, DocumentsRepo, DownloadTokensRepo, JobsRepo, NewJobRecord, RateLimitRepo,
    RepoError,
};
use pressroom::domain::entities::{
    DocumentRecord, DownloadTokenRecord, LockoutRecord, RateWindow,
};
use pressroom::domain::types::{ArtifactSlot, DocumentStatus, ResourceKind};
use pressroom::infra::db::PostgresRepositories;
use pressroom::infra::http::{ApiState, GatewaySettings};
use pressroom::infra::notify::LocalNotificationBus;
use pressroom::infra::storage::FilesystemObjectStore;

pub const JWT_SECRET: &str = "integration-session-key";
pub const INTERNAL_SECRET: &str = "integration-internal-secret";

pub fn session_token(user_id: i64, pwd_reset: bool) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    encode(
        &Header::default(),
        &SessionClaims {
            sub: user_id,
            exp: now + 600,
            iat: now,
            pwd_reset,
        },
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode session token")
}

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

/// Repositories without a database only serve `/health`, which is never hit here.
pub fn lazy_repositories() -> Arc<PostgresRepositories> {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://pressroom@localhost/pressroom_tests")
        .expect("lazy pool");
    Arc::new(PostgresRepositories::new(pool))
}

#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<HashMap<(ResourceKind, i64), DocumentRecord>>,
}

impl MemoryDocuments {
    pub async fn insert(&self, record: DocumentRecord) {
        self.docs
            .lock()
            .await
            .insert((record.kind, record.id), record);
    }

    pub async fn get(&self, kind: ResourceKind, id: i64) -> Option<DocumentRecord> {
        self.docs.lock().await.get(&(kind, id)).cloned()
    }
}

#[async_trait]
impl DocumentsRepo for MemoryDocuments {
    async fn find_document(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<DocumentRecord>, RepoError> {
        Ok(self.get(kind, id).await)
    }

    async fn mark_processing(
        &self,
        kind: ResourceKind,
        id: i64,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let mut docs = self.docs.lock().await;
        Ok(docs
            .get_mut(&(kind, id))
            .map(|doc| {
                doc.status = DocumentStatus::Processing;
                doc.error_code = None;
                doc.error_message = None;
                doc.updated_at = at;
            })
            .is_some())
    }

    async fn revert_processing(
        &self,
        previous: &DocumentRecord,
        marked_at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let mut docs = self.docs.lock().await;
        match docs.get_mut(&(previous.kind, previous.id)) {
            Some(doc) if doc.status == DocumentStatus::Processing && doc.updated_at == marked_at => {
                doc.status = previous.status;
                doc.error_code = previous.error_code;
                doc.error_message = previous.error_message.clone();
                doc.updated_at = previous.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_outcome(
        &self,
        kind: ResourceKind,
        id: i64,
        outcome: DocumentOutcome,
        at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut docs = self.docs.lock().await;
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
    enqueued: Mutex<Vec<NewJobRecord>>,
}

impl MemoryJobs {
    pub async fn enqueued(&self) -> Vec<NewJobRecord> {
        self.enqueued.lock().await.clone()
    }
}

#[async_trait]
impl JobsRepo for MemoryJobs {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        let mut jobs = self.enqueued.lock().await;
        jobs.push(job);
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Default)]
pub struct MemoryTokens {
    tokens: Mutex<Vec<DownloadTokenRecord>>,
}

#[async_trait]
impl DownloadTokensRepo for MemoryTokens {
    async fn insert_token(&self, record: DownloadTokenRecord) -> Result<(), RepoError> {
        self.tokens.lock().await.push(record);
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
        let mut tokens = self.tokens.lock().await;
        Ok(tokens
            .iter_mut()
            .find(|record| {
                record.token_hash == token_hash
                    && record.owner_id == owner_id
                    && record.kind == kind
                    && record.target_id == target_id
                    && record.consumed_at.is_none()
                    && record.expires_at > now
            })
            .map(|record| {
                record.consumed_at = Some(now);
                record.clone()
            }))
    }

    async fn purge_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut tokens = self.tokens.lock().await;
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
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            window_expires_at,
        });
        if window.window_expires_at <= now {
            window.count = 0;
            window.window_expires_at = window_expires_at;
        }
        window.count += 1;
        Ok(*window)
    }

    async fn load_window(&self, key: &str) -> Result<Option<RateWindow>, RepoError> {
        Ok(self.windows.lock().await.get(key).copied())
    }

    async fn load_lockout(&self, key: &str) -> Result<Option<LockoutRecord>, RepoError> {
        Ok(self.lockouts.lock().await.get(key).copied())
    }

    async fn record_failure(
        &self,
        key: &str,
        threshold: u32,
        locked_until: OffsetDateTime,
    ) -> Result<LockoutRecord, RepoError> {
        let mut lockouts = self.lockouts.lock().await;
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
        if let Some(record) = self.lockouts.lock().await.get_mut(key) {
            record.failures = 0;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| window.window_expires_at > now);
        Ok((before - windows.len()) as u64)
    }
}

/// Engine that "renders" without a browser, optionally refusing navigation.
pub struct FixedEngine {
    pub navigation_fails: bool,
}

struct FixedBrowser {
    navigation_fails: bool,
}

struct FixedPage {
    navigation_fails: bool,
}

impl BrowserEngine for FixedEngine {
    fn launch(&self) -> Result<Box<dyn EngineBrowser>, EngineError> {
        Ok(Box::new(FixedBrowser {
            navigation_fails: self.navigation_fails,
        }))
    }
}

impl EngineBrowser for FixedBrowser {
    fn open_page(&mut self) -> Result<Box<dyn EnginePage>, EngineError> {
        Ok(Box::new(FixedPage {
            navigation_fails: self.navigation_fails,
        }))
    }

    fn close(&mut self) {}
}

impl EnginePage for FixedPage {
    fn set_extra_headers(&mut self, _: &[(String, String)]) -> Result<(), EngineError> {
        Ok(())
    }

    fn add_init_script(&mut self, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn navigate(&mut self, _: &str, _: Duration) -> Result<(), EngineError> {
        if self.navigation_fails {
            return Err(EngineError::failed("net::ERR_CONNECTION_REFUSED"));
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
        Ok(b"%PDF-1.7 integration".to_vec())
    }

    fn screenshot(&mut self, _: &str, _: u32, _: Duration) -> Result<Vec<u8>, EngineError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    fn close(&mut self) {}
}

/// Everything the public router needs, backed by in-memory repositories and a temp store.
pub struct Harness {
    pub state: ApiState,
    pub documents: Arc<MemoryDocuments>,
    pub jobs: Arc<MemoryJobs>,
    pub store: Arc<FilesystemObjectStore>,
    pub bus: Arc<LocalNotificationBus>,
    pub storage_dir: TempDir,
}

pub fn harness(limits: RateLimits) -> Harness {
    let storage_dir = tempfile::tempdir().expect("storage dir");
    let store = Arc::new(
        FilesystemObjectStore::new(storage_dir.path().to_path_buf()).expect("object store"),
    );
    let documents = Arc::new(MemoryDocuments::default());
    let jobs = Arc::new(MemoryJobs::default());
    let rate_limits: Arc<MemoryRateLimits> = Arc::default();
    let bus = Arc::new(LocalNotificationBus::new());

    let limiter = RateLimiter::new(rate_limits.clone(), limits);
    let login_throttle = LoginThrottle::new(
        rate_limits,
        limiter.clone(),
        LockoutPolicy {
            threshold: 3,
            cooldown: Duration::from_secs(900),
        },
    );
    let subscriber: Arc<dyn NotificationSubscriber> = bus.clone();

    let state = ApiState {
        sessions: Arc::new(SessionVerifier::new(JWT_SECRET)),
        generation: Arc::new(GenerationService::new(
            documents.clone(),
            jobs.clone(),
            limiter,
        )),
        downloads: Arc::new(DownloadTokenService::new(
            Arc::new(MemoryTokens::default()),
            documents.clone(),
            store.clone(),
            Duration::from_secs(60),
        )),
        login_throttle: Arc::new(login_throttle),
        notifications: subscriber,
        gateway: GatewaySettings::default(),
        db: lazy_repositories(),
    };

    Harness {
        state,
        documents,
        jobs,
        store,
        bus,
        storage_dir,
    }
}
