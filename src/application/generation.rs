//! Submission side of the pipeline: validates a request and hands it to the queue.

use std::sync::Arc;

use pressroom_api_types::OutputKind;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::jobs::{GenerateJobPayload, enqueue_generate_job};
use crate::application::rate_limit::{RateLimitAction, RateLimitError, RateLimiter};
use crate::application::repos::{DocumentsRepo, JobsRepo, RepoError};
use crate::domain::types::{ArtifactSlot, JobType, ResourceKind};

const MAX_CORRELATION_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("document not found")]
    NotFound,
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: String,
    pub job_type: JobType,
    pub correlation_id: String,
}

#[derive(Clone)]
pub struct GenerationService {
    documents: Arc<dyn DocumentsRepo>,
    jobs: Arc<dyn JobsRepo>,
    limiter: RateLimiter,
}

impl GenerationService {
    pub fn new(
        documents: Arc<dyn DocumentsRepo>,
        jobs: Arc<dyn JobsRepo>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            documents,
            jobs,
            limiter,
        }
    }

    pub async fn submit(
        &self,
        owner_id: i64,
        kind: ResourceKind,
        id: i64,
        correlation_id: &str,
        output: Option<OutputKind>,
    ) -> Result<SubmittedJob, GenerationError> {
        let correlation_id = correlation_id.trim();
        if correlation_id.is_empty() || correlation_id.len() > MAX_CORRELATION_ID_LEN {
            return Err(GenerationError::Validation(format!(
                "correlation_id must be 1..={MAX_CORRELATION_ID_LEN} characters"
            )));
        }

        let slot = match output {
            Some(OutputKind::Pdf) => ArtifactSlot::Pdf,
            Some(OutputKind::Preview) => ArtifactSlot::Preview,
            None => kind.download_slot(),
        };
        let job_type = JobType::for_output(kind, slot).ok_or_else(|| {
            GenerationError::Validation(format!(
                "{} documents have no {} output",
                kind.as_str(),
                slot.extension()
            ))
        })?;

        self.limiter
            .check(RateLimitAction::Generate, &format!("user:{owner_id}"))
            .await?;

        let Some(previous) = self
            .documents
            .find_document(kind, id)
            .await?
            .filter(|document| document.owner_id == owner_id)
        else {
            return Err(GenerationError::NotFound);
        };

        let marked_at = to_stored_precision(OffsetDateTime::now_utc());
        self.documents.mark_processing(kind, id, marked_at).await?;

        let payload = GenerateJobPayload {
            target_id: id,
            owner_id,
            correlation_id: correlation_id.to_string(),
            attempt: 1,
        };
        let job_id = match enqueue_generate_job(self.jobs.as_ref(), job_type, &payload, None).await
        {
            Ok(job_id) => job_id,
            Err(err) => {
                // Without a job nothing would ever move the document out of processing.
                if let Err(revert_err) = self.documents.revert_processing(&previous, marked_at).await
                {
                    warn!(
                        target = "pressroom::application::generation",
                        kind = kind.as_str(),
                        target_id = id,
                        error = %revert_err,
                        "Failed to revert processing mark"
                    );
                }
                return Err(err.into());
            }
        };

        info!(
            target = "pressroom::application::generation",
            job_id = %job_id,
            job_type = job_type.as_str(),
            owner_id,
            target_id = id,
            correlation_id,
            "Generation job enqueued"
        );

        Ok(SubmittedJob {
            job_id,
            job_type,
            correlation_id: payload.correlation_id,
        })
    }
}

/// Timestamps round-trip through Postgres at microsecond precision.
fn to_stored_precision(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.nanosecond() / 1_000 * 1_000)
        .unwrap_or(at)
}
