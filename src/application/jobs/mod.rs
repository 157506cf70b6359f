mod context;
mod generate;
mod purge;
mod queue;

pub use context::{JobWorkerContext, RetryPolicy, job_failed};
pub use generate::{
    GenerateJobPayload, GenerationJobError, enqueue_generate_job, process_resume_pdf_job,
    process_resume_preview_job, process_template_preview_job, run_generation_job,
};
pub use purge::{PurgeContext, PurgeExpiredJob, process_purge_expired_job, purge_expired_schedule};
pub use queue::enqueue_job;
