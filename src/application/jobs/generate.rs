//! Workers that turn a stored layout into a rendered artifact.
//!
//! Retries are scheduled by the handler itself: a retryable failure re-enqueues the payload
//! with `attempt + 1` and a backed-off `run_at`, then acks the current job. Once the attempt
//! budget is spent the job is dead-lettered: logged at error level, recorded on the owning
//! document and published as an error notification.

use std::time::Instant;

use apalis::prelude::{Data, Error as ApalisError};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    application::{
        assembler::AssembleError,
        jobs::{JobWorkerContext, enqueue_job, job_failed},
        notify::{completed_message, error_message, notification_target, publish_detached},
        render::{RenderError, RenderRequest},
        repos::{DocumentOutcome, JobsRepo, RepoError},
        storage::{StorageError, artifact_key},
    },
    domain::{
        codes::ErrorCode,
        types::{JobType, ResourceKind},
    },
};

const METRIC_JOBS_TOTAL: &str = "pressroom_jobs_total";

fn first_attempt() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateJobPayload {
    pub target_id: i64,
    pub owner_id: i64,
    pub correlation_id: String,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

/// Enqueue one generation attempt. The broker itself never retries; see the module docs.
pub async fn enqueue_generate_job<J: JobsRepo + ?Sized>(
    repo: &J,
    job_type: JobType,
    payload: &GenerateJobPayload,
    run_at: Option<OffsetDateTime>,
) -> Result<String, RepoError> {
    enqueue_job(repo, job_type, payload, run_at).await
}

#[derive(Debug, Error)]
pub enum GenerationJobError {
    #[error("{} `{id}` not found for its owner", .kind.as_str())]
    DocumentMissing { kind: ResourceKind, id: i64 },
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("artifact upload failed")]
    Storage(#[source] StorageError),
    #[error("document update failed")]
    Repo(#[source] RepoError),
}

impl GenerationJobError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GenerationJobError::DocumentMissing { .. } => ErrorCode::DocumentMissing,
            GenerationJobError::Assemble(AssembleError::Malformed(_)) => {
                ErrorCode::MalformedLayout
            }
            GenerationJobError::Assemble(AssembleError::Storage(_))
            | GenerationJobError::Storage(_) => ErrorCode::StorageFailed,
            GenerationJobError::Render(err) => err.error_code(),
            GenerationJobError::Repo(_) => ErrorCode::System,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationJobError::DocumentMissing { .. } => false,
            GenerationJobError::Assemble(err) => err.is_retryable(),
            GenerationJobError::Render(err) => err.is_retryable(),
            GenerationJobError::Storage(err) => matches!(err, StorageError::Backend(_)),
            GenerationJobError::Repo(err) => err.is_transient(),
        }
    }
}

pub async fn process_resume_pdf_job(
    payload: GenerateJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    run_generation_job(JobType::ResumePdf, payload, &context).await
}

pub async fn process_resume_preview_job(
    payload: GenerateJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    run_generation_job(JobType::ResumePreview, payload, &context).await
}

pub async fn process_template_preview_job(
    payload: GenerateJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    run_generation_job(JobType::TemplatePreview, payload, &context).await
}

pub async fn run_generation_job(
    job_type: JobType,
    payload: GenerateJobPayload,
    ctx: &JobWorkerContext,
) -> Result<(), ApalisError> {
    let started_at = Instant::now();

    match generate(job_type, &payload, ctx).await {
        Ok(missing_keys) => {
            counter!(METRIC_JOBS_TOTAL, "job_type" => job_type.as_str(), "result" => "completed")
                .increment(1);
            info!(
                target = "pressroom::application::jobs::generate",
                job_type = job_type.as_str(),
                target_id = payload.target_id,
                correlation_id = %payload.correlation_id,
                attempt = payload.attempt,
                missing = missing_keys.len(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Generation completed"
            );
            let target = notification_target(job_type.resource(), payload.target_id);
            publish_detached(
                ctx.publisher.clone(),
                payload.owner_id,
                completed_message(target, &payload.correlation_id, missing_keys),
            );
            Ok(())
        }
        Err(err) => handle_failure(job_type, payload, ctx, err, started_at).await,
    }
}

async fn generate(
    job_type: JobType,
    payload: &GenerateJobPayload,
    ctx: &JobWorkerContext,
) -> Result<Vec<String>, GenerationJobError> {
    let kind = job_type.resource();
    let slot = job_type.slot();

    let document = ctx
        .documents
        .find_document(kind, payload.target_id)
        .await
        .map_err(GenerationJobError::Repo)?
        .filter(|document| document.owner_id == payload.owner_id)
        .ok_or(GenerationJobError::DocumentMissing {
            kind,
            id: payload.target_id,
        })?;

    let render_payload = ctx
        .assembler
        .assemble(document.owner_id, &document.layout)
        .await?;
    let missing_keys = render_payload.missing_keys();

    let request = RenderRequest {
        target_url: ctx.print_target.url_for(kind, document.id),
        headers: ctx.print_target.headers(),
        payload: render_payload,
        capture: slot.into(),
    };
    let bytes = ctx.orchestrator.render(request).await?;

    let key = artifact_key(document.owner_id, kind, document.id, slot);
    ctx.store
        .put(&key, Bytes::from(bytes), slot.content_type())
        .await
        .map_err(GenerationJobError::Storage)?;

    ctx.documents
        .record_outcome(
            kind,
            document.id,
            DocumentOutcome::Completed {
                slot,
                key,
                missing_keys: missing_keys.clone(),
            },
            OffsetDateTime::now_utc(),
        )
        .await
        .map_err(GenerationJobError::Repo)?;

    Ok(missing_keys)
}

async fn handle_failure(
    job_type: JobType,
    payload: GenerateJobPayload,
    ctx: &JobWorkerContext,
    err: GenerationJobError,
    started_at: Instant,
) -> Result<(), ApalisError> {
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    if err.is_retryable() && ctx.retry.allows_retry(payload.attempt) {
        let delay = ctx.retry.backoff(payload.attempt);
        let next = GenerateJobPayload {
            attempt: payload.attempt + 1,
            ..payload.clone()
        };
        let run_at = OffsetDateTime::now_utc() + delay;

        match enqueue_generate_job(ctx.jobs.as_ref(), job_type, &next, Some(run_at)).await {
            Ok(job_id) => {
                counter!(METRIC_JOBS_TOTAL, "job_type" => job_type.as_str(), "result" => "retried")
                    .increment(1);
                warn!(
                    target = "pressroom::application::jobs::generate",
                    job_type = job_type.as_str(),
                    target_id = payload.target_id,
                    correlation_id = %payload.correlation_id,
                    attempt = payload.attempt,
                    next_job_id = %job_id,
                    delay_ms = delay.as_millis() as u64,
                    elapsed_ms,
                    error = %err,
                    "Generation failed; retry scheduled"
                );
                return Ok(());
            }
            Err(enqueue_err) => {
                warn!(
                    target = "pressroom::application::jobs::generate",
                    job_type = job_type.as_str(),
                    target_id = payload.target_id,
                    error = %enqueue_err,
                    "Failed to schedule retry; dead-lettering"
                );
            }
        }
    }

    dead_letter(job_type, &payload, ctx, &err, elapsed_ms).await;
    Err(job_failed(err))
}

async fn dead_letter(
    job_type: JobType,
    payload: &GenerateJobPayload,
    ctx: &JobWorkerContext,
    err: &GenerationJobError,
    elapsed_ms: u64,
) {
    let code = err.error_code();
    let kind = job_type.resource();

    counter!(METRIC_JOBS_TOTAL, "job_type" => job_type.as_str(), "result" => "dead_lettered")
        .increment(1);
    error!(
        target = "pressroom::application::jobs::generate",
        job_type = job_type.as_str(),
        target_id = payload.target_id,
        owner_id = payload.owner_id,
        correlation_id = %payload.correlation_id,
        attempt = payload.attempt,
        error_code = code.code(),
        elapsed_ms,
        error = %err,
        "Generation dead-lettered"
    );

    if !matches!(err, GenerationJobError::DocumentMissing { .. }) {
        let outcome = DocumentOutcome::Failed {
            code: code.code(),
            message: code.public_message().to_string(),
        };
        if let Err(record_err) = ctx
            .documents
            .record_outcome(kind, payload.target_id, outcome, OffsetDateTime::now_utc())
            .await
        {
            warn!(
                target = "pressroom::application::jobs::generate",
                target_id = payload.target_id,
                error = %record_err,
                "Failed to record generation failure on document"
            );
        }
    }

    publish_detached(
        ctx.publisher.clone(),
        payload.owner_id,
        error_message(
            notification_target(kind, payload.target_id),
            &payload.correlation_id,
            code,
            code.public_message(),
        ),
    );
}
