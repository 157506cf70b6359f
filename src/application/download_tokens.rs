//! Single-use, short-lived tokens that authorize one artifact download without a session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{DocumentsRepo, DownloadTokensRepo, RepoError};
use crate::application::storage::{ObjectStore, StorageError};
use crate::domain::entities::DownloadTokenRecord;
use crate::domain::types::ResourceKind;

const METRIC_TOKENS_ISSUED: &str = "pressroom_download_tokens_issued_total";
const METRIC_TOKENS_REJECTED: &str = "pressroom_download_tokens_rejected_total";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("document not found")]
    NotFound,
    #[error("document has no completed artifact")]
    NotReady,
    /// Unknown, expired, consumed and mismatched tokens all collapse into this variant.
    #[error("download link expired")]
    Expired,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("artifact could not be read")]
    Storage(#[source] StorageError),
}

#[derive(Debug, Clone)]
pub struct IssuedDownloadToken {
    pub token: String,
    pub owner_id: i64,
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub bytes: Bytes,
    pub content_type: String,
    pub filename: String,
}

#[derive(Clone)]
pub struct DownloadTokenService {
    tokens: Arc<dyn DownloadTokensRepo>,
    documents: Arc<dyn DocumentsRepo>,
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl DownloadTokenService {
    pub fn new(
        tokens: Arc<dyn DownloadTokensRepo>,
        documents: Arc<dyn DocumentsRepo>,
        store: Arc<dyn ObjectStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            tokens,
            documents,
            store,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(
        &self,
        owner_id: i64,
        kind: ResourceKind,
        id: i64,
    ) -> Result<IssuedDownloadToken, DownloadError> {
        self.issue_at(owner_id, kind, id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn issue_at(
        &self,
        owner_id: i64,
        kind: ResourceKind,
        id: i64,
        now: OffsetDateTime,
    ) -> Result<IssuedDownloadToken, DownloadError> {
        let document = self
            .documents
            .find_document(kind, id)
            .await?
            .filter(|document| document.owner_id == owner_id)
            .ok_or(DownloadError::NotFound)?;
        if document.artifact_key(kind.download_slot()).is_none() {
            return Err(DownloadError::NotReady);
        }

        let token = Self::generate_token();
        self.tokens
            .insert_token(DownloadTokenRecord {
                token_hash: Self::hash_token(&token),
                owner_id,
                kind,
                target_id: id,
                expires_at: now + self.ttl,
                consumed_at: None,
            })
            .await?;

        counter!(METRIC_TOKENS_ISSUED).increment(1);
        info!(
            target = "pressroom::application::download_tokens",
            owner_id,
            kind = kind.as_str(),
            target_id = id,
            ttl_secs = self.ttl.as_secs(),
            "Download token issued"
        );

        Ok(IssuedDownloadToken {
            token,
            owner_id,
            expires_in: self.ttl,
        })
    }

    pub async fn redeem(
        &self,
        owner_id: i64,
        kind: ResourceKind,
        id: i64,
        token: &str,
    ) -> Result<DownloadedArtifact, DownloadError> {
        self.redeem_at(owner_id, kind, id, token, OffsetDateTime::now_utc())
            .await
    }

    /// Consumes the token and loads the artifact it grants.
    ///
    /// The token is spent before storage is read, so a storage failure still uses up the link
    /// and the client has to request a new one.
    pub async fn redeem_at(
        &self,
        owner_id: i64,
        kind: ResourceKind,
        id: i64,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<DownloadedArtifact, DownloadError> {
        let consumed = self
            .tokens
            .consume_token(&Self::hash_token(token), owner_id, kind, id, now)
            .await?;
        if consumed.is_none() {
            return Err(Self::reject(owner_id, id, "token_not_redeemable"));
        }

        let slot = kind.download_slot();
        let key = self
            .documents
            .find_document(kind, id)
            .await?
            .filter(|document| document.owner_id == owner_id)
            .and_then(|document| document.artifact_key(slot).map(str::to_string))
            .ok_or_else(|| Self::reject(owner_id, id, "artifact_missing"))?;

        let object = match self.store.get(&key).await {
            Ok(object) => object,
            Err(StorageError::NotFound(_)) | Err(StorageError::AccessDenied(_)) => {
                return Err(Self::reject(owner_id, id, "object_missing"));
            }
            Err(err) => return Err(DownloadError::Storage(err)),
        };

        Ok(DownloadedArtifact {
            bytes: object.bytes,
            content_type: slot.content_type().to_string(),
            filename: format!("{}-{id}.{}", kind.as_str(), slot.extension()),
        })
    }

    fn reject(owner_id: i64, id: i64, reason: &'static str) -> DownloadError {
        counter!(METRIC_TOKENS_REJECTED).increment(1);
        debug!(
            target = "pressroom::application::download_tokens",
            owner_id,
            target_id = id,
            reason,
            "Download token rejected"
        );
        DownloadError::Expired
    }

    fn hash_token(token: &str) -> Vec<u8> {
        Sha256::digest(token.as_bytes()).to_vec()
    }

    fn generate_token() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::repos::DocumentOutcome;
    use crate::application::testing::{MemoryDocuments, MemoryStore, MemoryTokens, document};
    use crate::domain::types::ArtifactSlot;

    async fn service_with_completed_resume() -> DownloadTokenService {
        completed_resume_service(MemoryStore::default()).await
    }

    async fn completed_resume_service(store: MemoryStore) -> DownloadTokenService {
        let documents = Arc::new(MemoryDocuments::default());
        documents.insert(document(ResourceKind::Resume, 42, 7, json!({})));
        documents
            .record_outcome(
                ResourceKind::Resume,
                42,
                DocumentOutcome::Completed {
                    slot: ArtifactSlot::Pdf,
                    key: "generated/7/resume/42.pdf".to_string(),
                    missing_keys: Vec::new(),
                },
                OffsetDateTime::UNIX_EPOCH,
            )
            .await
            .expect("record");
        let store = Arc::new(store);
        store.insert("generated/7/resume/42.pdf", b"%PDF", "application/pdf");
        DownloadTokenService::new(
            Arc::new(MemoryTokens::default()),
            documents,
            store,
            Duration::from_secs(60),
        )
    }

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1_700_000_000 + seconds)
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let service = service_with_completed_resume().await;
        let issued = service
            .issue_at(7, ResourceKind::Resume, 42, at(0))
            .await
            .expect("issue");
        assert_eq!(issued.expires_in, Duration::from_secs(60));
        assert_eq!(issued.token.len(), 64);

        let artifact = service
            .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(5))
            .await
            .expect("first redeem");
        assert_eq!(&artifact.bytes[..], b"%PDF");
        assert_eq!(artifact.filename, "resume-42.pdf");

        for _ in 0..2 {
            let err = service
                .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(6))
                .await
                .expect_err("consumed");
            assert!(matches!(err, DownloadError::Expired));
        }
    }

    #[tokio::test]
    async fn storage_failure_still_spends_the_token() {
        let service = completed_resume_service(MemoryStore::failing_reads()).await;
        let issued = service
            .issue_at(7, ResourceKind::Resume, 42, at(0))
            .await
            .expect("issue");

        let err = service
            .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(1))
            .await
            .expect_err("storage down");
        assert!(matches!(err, DownloadError::Storage(_)));

        let err = service
            .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(2))
            .await
            .expect_err("already spent");
        assert!(matches!(err, DownloadError::Expired));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_like_a_consumed_one() {
        let service = service_with_completed_resume().await;
        let issued = service
            .issue_at(7, ResourceKind::Resume, 42, at(0))
            .await
            .expect("issue");

        let err = service
            .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(60))
            .await
            .expect_err("expired");
        assert!(matches!(err, DownloadError::Expired));
    }

    #[tokio::test]
    async fn mismatched_owner_target_or_unknown_token_is_expired() {
        let service = service_with_completed_resume().await;
        let issued = service
            .issue_at(7, ResourceKind::Resume, 42, at(0))
            .await
            .expect("issue");

        for (owner, kind, id, token) in [
            (8, ResourceKind::Resume, 42, issued.token.as_str()),
            (7, ResourceKind::Resume, 43, issued.token.as_str()),
            (7, ResourceKind::Template, 42, issued.token.as_str()),
            (7, ResourceKind::Resume, 42, "not-a-token"),
        ] {
            let err = service
                .redeem_at(owner, kind, id, token, at(1))
                .await
                .expect_err("rejected");
            assert!(matches!(err, DownloadError::Expired));
        }

        service
            .redeem_at(7, ResourceKind::Resume, 42, &issued.token, at(2))
            .await
            .expect("original binding still redeemable");
    }

    #[tokio::test]
    async fn issue_requires_completed_artifact_owned_by_caller() {
        let documents = Arc::new(MemoryDocuments::default());
        documents.insert(document(ResourceKind::Resume, 1, 7, json!({})));
        let service = DownloadTokenService::new(
            Arc::new(MemoryTokens::default()),
            documents,
            Arc::new(MemoryStore::default()),
            Duration::from_secs(60),
        );

        assert!(matches!(
            service.issue(7, ResourceKind::Resume, 1).await,
            Err(DownloadError::NotReady)
        ));
        assert!(matches!(
            service.issue(8, ResourceKind::Resume, 1).await,
            Err(DownloadError::NotFound)
        ));
    }
}
