use async_trait::async_trait;

use crate::application::repos::{JobsRepo, NewJobRecord, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

/// Status apalis gives rows that are waiting for their `run_at`.
const PENDING: &str = "Pending";

#[async_trait]
impl JobsRepo for PostgresRepositories {
    /// Pushes straight into the apalis queue table so a retry scheduled by one worker is
    /// claimed by whichever worker of that job type is free at `run_at`.
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
        sqlx::query_scalar::<_, String>(
            "SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id",
        )
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(PENDING)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .bind(job.priority)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
