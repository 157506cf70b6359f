//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::{
    DocumentRecord, DownloadTokenRecord, LockoutRecord, RateWindow,
};
use crate::domain::types::{ArtifactSlot, JobType, ResourceKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewJobRecord {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
    pub priority: i32,
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError>;
}

/// Outcome written to the owning document when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Completed {
        slot: ArtifactSlot,
        key: String,
        missing_keys: Vec<String>,
    },
    Failed {
        code: u16,
        message: String,
    },
}

#[async_trait]
pub trait DocumentsRepo: Send + Sync {
    async fn find_document(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<DocumentRecord>, RepoError>;

    /// Flags the document as in progress; returns `false` if it does not exist.
    async fn mark_processing(
        &self,
        kind: ResourceKind,
        id: i64,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError>;

    /// Puts back the status and error fields of `previous`, but only while the document still
    /// carries the processing mark written at `marked_at`. Returns whether it was reverted.
    async fn revert_processing(
        &self,
        previous: &DocumentRecord,
        marked_at: OffsetDateTime,
    ) -> Result<bool, RepoError>;

    /// Last write wins; concurrent jobs for one target overwrite each other.
    async fn record_outcome(
        &self,
        kind: ResourceKind,
        id: i64,
        outcome: DocumentOutcome,
        at: OffsetDateTime,
    ) -> Result<(), RepoError>;
}

#[async_trait]
pub trait DownloadTokensRepo: Send + Sync {
    async fn insert_token(&self, record: DownloadTokenRecord) -> Result<(), RepoError>;

    /// Atomically marks a live, unconsumed token as consumed.
    ///
    /// Returns the record only when this call performed the transition; every other case
    /// (unknown hash, wrong owner or target, already consumed, expired) yields `None`.
    async fn consume_token(
        &self,
        token_hash: &[u8],
        owner_id: i64,
        kind: ResourceKind,
        target_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<DownloadTokenRecord>, RepoError>;

    async fn purge_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait RateLimitRepo: Send + Sync {
    /// Atomically increments the counter for `key`, starting a fresh window when the stored
    /// one has expired. Returns the post-increment state.
    async fn hit_window(
        &self,
        key: &str,
        window_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<RateWindow, RepoError>;

    /// Current state of `key` without counting a hit.
    async fn load_window(&self, key: &str) -> Result<Option<RateWindow>, RepoError>;

    async fn load_lockout(&self, key: &str) -> Result<Option<LockoutRecord>, RepoError>;

    /// Adds one consecutive failure. Reaching `threshold` stores `locked_until` and restarts
    /// the failure count, so the next lockout needs another full run of failures.
    async fn record_failure(
        &self,
        key: &str,
        threshold: u32,
        locked_until: OffsetDateTime,
    ) -> Result<LockoutRecord, RepoError>;

    async fn reset_failures(&self, key: &str) -> Result<(), RepoError>;

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}
