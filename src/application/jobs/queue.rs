use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    application::repos::{JobsRepo, NewJobRecord, RepoError},
    domain::types::JobType,
};

/// The broker runs each row once; retries are new rows scheduled by the handler.
const BROKER_ATTEMPTS: i32 = 1;

/// Interactive downloads jump ahead of background previews.
fn priority_for(job_type: JobType) -> i32 {
    match job_type {
        JobType::ResumePdf => 10,
        JobType::ResumePreview | JobType::TemplatePreview => 0,
    }
}

/// Enqueue a job with the provided payload, returning the broker-assigned id.
///
/// Without `run_at` the job is due immediately.
pub async fn enqueue_job<J, P>(
    repo: &J,
    job_type: JobType,
    payload: &P,
    run_at: Option<OffsetDateTime>,
) -> Result<String, RepoError>
where
    J: JobsRepo + ?Sized,
    P: Serialize,
{
    let payload = serde_json::to_value(payload).map_err(|err| RepoError::InvalidInput {
        message: err.to_string(),
    })?;

    repo.enqueue_job(NewJobRecord {
        job_type,
        payload,
        run_at: run_at.unwrap_or_else(OffsetDateTime::now_utc),
        max_attempts: BROKER_ATTEMPTS,
        priority: priority_for(job_type),
    })
    .await
}
