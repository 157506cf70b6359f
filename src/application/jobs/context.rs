use std::{sync::Arc, time::Duration};

use apalis::prelude::Error as ApalisError;

use crate::application::{
    assembler::PrintDataAssembler,
    notify::NotificationPublisher,
    print_target::PrintTarget,
    render::RenderOrchestrator,
    repos::{DocumentsRepo, JobsRepo},
    storage::ObjectStore,
};

/// Exponential backoff applied to retryable generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Whether a job that just failed on `attempt` (1-based) gets another one.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Shared context passed to generation workers.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub documents: Arc<dyn DocumentsRepo>,
    pub jobs: Arc<dyn JobsRepo>,
    pub store: Arc<dyn ObjectStore>,
    pub assembler: PrintDataAssembler,
    pub orchestrator: RenderOrchestrator,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub print_target: PrintTarget,
    pub retry: RetryPolicy,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
