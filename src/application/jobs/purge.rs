//! Cron job removing expired download tokens and stale rate-limit state.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;
use time::OffsetDateTime;

use crate::application::repos::{DownloadTokensRepo, RateLimitRepo};

const PURGE_SCHEDULE: &str = "0 0 * * * *";

/// Marker struct for the cron-triggered purge job.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct PurgeExpiredJob;

impl From<chrono::DateTime<chrono::Utc>> for PurgeExpiredJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct PurgeContext {
    pub tokens: Arc<dyn DownloadTokensRepo>,
    pub rate_limits: Arc<dyn RateLimitRepo>,
}

/// Failures are logged and swallowed; the next run picks up the same rows.
pub async fn process_purge_expired_job(
    _job: PurgeExpiredJob,
    ctx: Data<PurgeContext>,
) -> Result<(), apalis::prelude::Error> {
    let now = OffsetDateTime::now_utc();

    match ctx.tokens.purge_expired_tokens(now).await {
        Ok(count) if count > 0 => {
            tracing::info!(
                target = "pressroom::application::jobs::purge",
                purged_tokens = count,
                "Purged expired download tokens"
            );
        }
        Err(err) => {
            tracing::warn!(
                target = "pressroom::application::jobs::purge",
                error = %err,
                "Failed to purge download tokens"
            );
        }
        _ => {}
    }

    match ctx.rate_limits.purge_expired(now).await {
        Ok(count) if count > 0 => {
            tracing::info!(
                target = "pressroom::application::jobs::purge",
                purged_rows = count,
                "Purged expired rate-limit state"
            );
        }
        Err(err) => {
            tracing::warn!(
                target = "pressroom::application::jobs::purge",
                error = %err,
                "Failed to purge rate-limit state"
            );
        }
        _ => {}
    }

    Ok(())
}

/// Hourly, at minute 0.
pub fn purge_expired_schedule() -> Result<Schedule, String> {
    Schedule::from_str(PURGE_SCHEDULE).map_err(|err| err.to_string())
}
