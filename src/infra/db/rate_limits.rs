use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{RateLimitRepo, RepoError},
    domain::entities::{LockoutRecord, RateWindow},
};

use super::{PostgresRepositories, map_sqlx_error, to_count};

#[derive(sqlx::FromRow)]
struct WindowRow {
    count: i32,
    window_expires_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct LockoutRow {
    failures: i32,
    locked_until: Option<OffsetDateTime>,
}

impl From<LockoutRow> for LockoutRecord {
    fn from(row: LockoutRow) -> Self {
        Self {
            failures: to_count(row.failures),
            locked_until: row.locked_until,
        }
    }
}

#[async_trait]
impl RateLimitRepo for PostgresRepositories {
    async fn hit_window(
        &self,
        key: &str,
        window_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<RateWindow, RepoError> {
        let row = sqlx::query_as::<_, WindowRow>(
            r#"
            INSERT INTO rate_windows AS w (key, count, window_expires_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (key) DO UPDATE
               SET count = CASE WHEN w.window_expires_at <= $3 THEN 1 ELSE w.count + 1 END,
                   window_expires_at = CASE
                       WHEN w.window_expires_at <= $3 THEN EXCLUDED.window_expires_at
                       ELSE w.window_expires_at
                   END
            RETURNING count, window_expires_at
            "#,
        )
        .bind(key)
        .bind(window_expires_at)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(RateWindow {
            count: to_count(row.count),
            window_expires_at: row.window_expires_at,
        })
    }

    async fn load_window(&self, key: &str) -> Result<Option<RateWindow>, RepoError> {
        let row = sqlx::query_as::<_, WindowRow>(
            "SELECT count, window_expires_at FROM rate_windows WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|row| RateWindow {
            count: to_count(row.count),
            window_expires_at: row.window_expires_at,
        }))
    }

    async fn load_lockout(&self, key: &str) -> Result<Option<LockoutRecord>, RepoError> {
        let row = sqlx::query_as::<_, LockoutRow>(
            "SELECT failures, locked_until FROM lockouts WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(LockoutRecord::from))
    }

    async fn record_failure(
        &self,
        key: &str,
        threshold: u32,
        locked_until: OffsetDateTime,
    ) -> Result<LockoutRecord, RepoError> {
        let threshold = i32::try_from(threshold).unwrap_or(i32::MAX);
        let row = sqlx::query_as::<_, LockoutRow>(
            r#"
            INSERT INTO lockouts AS l (key, failures, locked_until, updated_at)
            VALUES (
                $1,
                CASE WHEN 1 >= $2 THEN 0 ELSE 1 END,
                CASE WHEN 1 >= $2 THEN $3 ELSE NULL END,
                now()
            )
            ON CONFLICT (key) DO UPDATE
               SET failures = CASE WHEN l.failures + 1 >= $2 THEN 0 ELSE l.failures + 1 END,
                   locked_until = CASE WHEN l.failures + 1 >= $2 THEN $3 ELSE l.locked_until END,
                   updated_at = now()
            RETURNING failures, locked_until
            "#,
        )
        .bind(key)
        .bind(threshold)
        .bind(locked_until)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn reset_failures(&self, key: &str) -> Result<(), RepoError> {
        sqlx::query("UPDATE lockouts SET failures = 0, updated_at = now() WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let windows = sqlx::query("DELETE FROM rate_windows WHERE window_expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let lockouts = sqlx::query(
            r#"
            DELETE FROM lockouts
             WHERE (locked_until IS NULL OR locked_until <= $1)
               AND (failures = 0 OR updated_at <= $1 - INTERVAL '1 day')
            "#,
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(windows.rows_affected() + lockouts.rows_affected())
    }
}
