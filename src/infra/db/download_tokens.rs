use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{DownloadTokensRepo, RepoError},
    domain::{entities::DownloadTokenRecord, types::ResourceKind},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TokenRow {
    token_hash: Vec<u8>,
    owner_id: i64,
    kind: String,
    target_id: i64,
    expires_at: OffsetDateTime,
    consumed_at: Option<OffsetDateTime>,
}

impl TryFrom<TokenRow> for DownloadTokenRecord {
    type Error = RepoError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let kind = ResourceKind::try_from(row.kind.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown token kind `{}`", row.kind))
        })?;
        Ok(Self {
            token_hash: row.token_hash,
            owner_id: row.owner_id,
            kind,
            target_id: row.target_id,
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
        })
    }
}

#[async_trait]
impl DownloadTokensRepo for PostgresRepositories {
    async fn insert_token(&self, record: DownloadTokenRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO download_tokens (token_hash, owner_id, kind, target_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.owner_id)
        .bind(record.kind.as_str())
        .bind(record.target_id)
        .bind(record.expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn consume_token(
        &self,
        token_hash: &[u8],
        owner_id: i64,
        kind: ResourceKind,
        target_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<DownloadTokenRecord>, RepoError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE download_tokens
               SET consumed_at = $5
             WHERE token_hash = $1
               AND owner_id = $2
               AND kind = $3
               AND target_id = $4
               AND consumed_at IS NULL
               AND expires_at > $5
            RETURNING token_hash, owner_id, kind, target_id, expires_at, consumed_at
            "#,
        )
        .bind(token_hash)
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(target_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(DownloadTokenRecord::try_from).transpose()
    }

    async fn purge_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "DELETE FROM download_tokens WHERE expires_at <= $1 OR consumed_at IS NOT NULL",
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
