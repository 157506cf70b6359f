//! Hourly action caps and consecutive-failure lockouts backed by a shared store.
//!
//! Counters are keyed `action:identity:bucket`, where the bucket is the UTC hour. Lockouts are
//! keyed per identity and checked before the hourly window, so a locked identity is refused
//! even when its window still has capacity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::repos::{RateLimitRepo, RepoError};

const WINDOW_SECONDS: i64 = 3_600;
const METRIC_RATE_LIMITED: &str = "pressroom_rate_limited_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    Generate,
    Upload,
}

impl RateLimitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::Generate => "generate",
            RateLimitAction::Upload => "upload",
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit for `{action}` exceeded")]
    Limited {
        action: RateLimitAction,
        retry_after: Duration,
    },
    #[error("identity locked out")]
    Locked { retry_after: Duration },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl RateLimitError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitError::Limited { retry_after, .. } | RateLimitError::Locked { retry_after } => {
                Some(*retry_after)
            }
            RateLimitError::Repo(_) => None,
        }
    }
}

/// Per-hour caps for each action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub login_per_hour: u32,
    pub generate_per_hour: u32,
    pub upload_per_hour: u32,
}

impl RateLimits {
    pub fn limit_for(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::Login => self.login_per_hour,
            RateLimitAction::Generate => self.generate_per_hour,
            RateLimitAction::Upload => self.upload_per_hour,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login_per_hour: 20,
            generate_per_hour: 60,
            upload_per_hour: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(15 * 60),
        }
    }
}

fn window_key(action: RateLimitAction, identity: &str, bucket: i64) -> String {
    format!("{action}:{identity}:{bucket}")
}

fn lockout_key(identity: &str) -> String {
    format!("lockout:{identity}")
}

fn until(later: OffsetDateTime, now: OffsetDateTime) -> Duration {
    Duration::try_from(later - now).unwrap_or(Duration::ZERO)
}

#[derive(Clone)]
pub struct RateLimiter {
    repo: Arc<dyn RateLimitRepo>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(repo: Arc<dyn RateLimitRepo>, limits: RateLimits) -> Self {
        Self { repo, limits }
    }

    pub async fn check(&self, action: RateLimitAction, identity: &str) -> Result<(), RateLimitError> {
        self.check_at(action, identity, OffsetDateTime::now_utc())
            .await
    }

    /// Counts one attempt and rejects it once the hourly cap is exceeded.
    pub async fn check_at(
        &self,
        action: RateLimitAction,
        identity: &str,
        now: OffsetDateTime,
    ) -> Result<(), RateLimitError> {
        let (key, window_end) = window_for(action, identity, now)?;
        let window = self.repo.hit_window(&key, window_end, now).await?;

        if window.count > self.limits.limit_for(action) {
            counter!(METRIC_RATE_LIMITED, "action" => action.as_str(), "reason" => "window")
                .increment(1);
            warn!(
                target = "pressroom::application::rate_limit",
                action = action.as_str(),
                identity,
                count = window.count,
                "Hourly rate limit exceeded"
            );
            return Err(RateLimitError::Limited {
                action,
                retry_after: until(window.window_expires_at, now),
            });
        }
        Ok(())
    }

    /// Rejects when the current window is already full, without counting an attempt.
    pub async fn peek_at(
        &self,
        action: RateLimitAction,
        identity: &str,
        now: OffsetDateTime,
    ) -> Result<(), RateLimitError> {
        let (key, _) = window_for(action, identity, now)?;
        let Some(window) = self.repo.load_window(&key).await? else {
            return Ok(());
        };
        if window.window_expires_at > now && window.count >= self.limits.limit_for(action) {
            counter!(METRIC_RATE_LIMITED, "action" => action.as_str(), "reason" => "window")
                .increment(1);
            return Err(RateLimitError::Limited {
                action,
                retry_after: until(window.window_expires_at, now),
            });
        }
        Ok(())
    }
}

fn window_for(
    action: RateLimitAction,
    identity: &str,
    now: OffsetDateTime,
) -> Result<(String, OffsetDateTime), RepoError> {
    let bucket = now.unix_timestamp().div_euclid(WINDOW_SECONDS);
    let window_end = OffsetDateTime::from_unix_timestamp((bucket + 1) * WINDOW_SECONDS)
        .map_err(|err| RepoError::InvalidInput {
            message: err.to_string(),
        })?;
    Ok((window_key(action, identity, bucket), window_end))
}

/// Lockout state machine for authentication attempts.
///
/// Only failed attempts are counted against the hourly `login` window, so an identity that keeps
/// authenticating successfully is never throttled.
#[derive(Clone)]
pub struct LoginThrottle {
    repo: Arc<dyn RateLimitRepo>,
    limiter: RateLimiter,
    policy: LockoutPolicy,
}

impl LoginThrottle {
    pub fn new(repo: Arc<dyn RateLimitRepo>, limiter: RateLimiter, policy: LockoutPolicy) -> Self {
        Self {
            repo,
            limiter,
            policy,
        }
    }

    pub async fn check(&self, identity: &str) -> Result<(), RateLimitError> {
        self.check_at(identity, OffsetDateTime::now_utc()).await
    }

    /// Refuses locked identities first, then identities whose failures filled the hourly window.
    pub async fn check_at(&self, identity: &str, now: OffsetDateTime) -> Result<(), RateLimitError> {
        if let Some(lockout) = self.repo.load_lockout(&lockout_key(identity)).await? {
            if let Some(locked_until) = lockout.locked_until.filter(|until| *until > now) {
                counter!(METRIC_RATE_LIMITED, "action" => "login", "reason" => "lockout")
                    .increment(1);
                return Err(RateLimitError::Locked {
                    retry_after: until(locked_until, now),
                });
            }
        }
        self.limiter
            .peek_at(RateLimitAction::Login, identity, now)
            .await
    }

    pub async fn record_failure(&self, identity: &str) -> Result<bool, RateLimitError> {
        self.record_failure_at(identity, OffsetDateTime::now_utc())
            .await
    }

    /// Returns `true` when this failure triggered a lockout.
    pub async fn record_failure_at(
        &self,
        identity: &str,
        now: OffsetDateTime,
    ) -> Result<bool, RateLimitError> {
        match self
            .limiter
            .check_at(RateLimitAction::Login, identity, now)
            .await
        {
            Err(RateLimitError::Repo(err)) => return Err(err.into()),
            Ok(()) | Err(_) => {}
        }

        let locked_until = now + self.policy.cooldown;
        let record = self
            .repo
            .record_failure(&lockout_key(identity), self.policy.threshold, locked_until)
            .await?;
        // The store truncates timestamps, so a fresh lockout is recognised by the reset counter.
        let locked = record.failures == 0 && record.locked_until.is_some_and(|until| until > now);
        if locked {
            info!(
                target = "pressroom::application::rate_limit",
                identity,
                cooldown_secs = self.policy.cooldown.as_secs(),
                "Identity locked out after consecutive failures"
            );
        }
        Ok(locked)
    }

    pub async fn record_success(&self, identity: &str) -> Result<(), RateLimitError> {
        self.repo.reset_failures(&lockout_key(identity)).await?;
        Ok(())
    }
}
