use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{DocumentOutcome, DocumentsRepo, RepoError},
    domain::{
        entities::DocumentRecord,
        types::{ArtifactSlot, DocumentStatus, ResourceKind},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct DocumentRow {
    kind: String,
    id: i64,
    owner_id: i64,
    layout: serde_json::Value,
    status: String,
    pdf_key: Option<String>,
    preview_key: Option<String>,
    error_code: Option<i32>,
    error_message: Option<String>,
    missing_keys: Vec<String>,
    updated_at: OffsetDateTime,
}

impl TryFrom<DocumentRow> for DocumentRecord {
    type Error = RepoError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let kind = ResourceKind::try_from(row.kind.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown document kind `{}`", row.kind))
        })?;
        let status = DocumentStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown document status `{}`", row.status))
        })?;

        Ok(Self {
            kind,
            id: row.id,
            owner_id: row.owner_id,
            layout: row.layout,
            status,
            pdf_key: row.pdf_key,
            preview_key: row.preview_key,
            error_code: row.error_code,
            error_message: row.error_message,
            missing_keys: row.missing_keys,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl DocumentsRepo for PostgresRepositories {
    async fn find_document(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<DocumentRecord>, RepoError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT kind, id, owner_id, layout, status, pdf_key, preview_key,
                   error_code, error_message, missing_keys, updated_at
              FROM documents
             WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(DocumentRecord::try_from).transpose()
    }

    async fn mark_processing(
        &self,
        kind: ResourceKind,
        id: i64,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
               SET status = $3,
                   error_code = NULL,
                   error_message = NULL,
                   updated_at = $4
             WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(DocumentStatus::Processing.as_str())
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn revert_processing(
        &self,
        previous: &DocumentRecord,
        marked_at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
               SET status = $3,
                   error_code = $4,
                   error_message = $5,
                   updated_at = $6
             WHERE kind = $1 AND id = $2 AND status = $7 AND updated_at = $8
            "#,
        )
        .bind(previous.kind.as_str())
        .bind(previous.id)
        .bind(previous.status.as_str())
        .bind(previous.error_code)
        .bind(previous.error_message.as_deref())
        .bind(previous.updated_at)
        .bind(DocumentStatus::Processing.as_str())
        .bind(marked_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_outcome(
        &self,
        kind: ResourceKind,
        id: i64,
        outcome: DocumentOutcome,
        at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let query = match outcome {
            DocumentOutcome::Completed {
                slot,
                key,
                missing_keys,
            } => {
                let column = match slot {
                    ArtifactSlot::Pdf => "pdf_key",
                    ArtifactSlot::Preview => "preview_key",
                };
                let sql = format!(
                    "UPDATE documents
                        SET status = $3,
                            {column} = $4,
                            missing_keys = $5,
                            error_code = NULL,
                            error_message = NULL,
                            updated_at = $6
                      WHERE kind = $1 AND id = $2"
                );
                sqlx::query(&sql)
                    .bind(kind.as_str())
                    .bind(id)
                    .bind(DocumentStatus::Completed.as_str())
                    .bind(key)
                    .bind(missing_keys)
                    .bind(at)
                    .execute(self.pool())
                    .await
            }
            DocumentOutcome::Failed { code, message } => {
                sqlx::query(
                    r#"
                    UPDATE documents
                       SET status = $3,
                           error_code = $4,
                           error_message = $5,
                           updated_at = $6
                     WHERE kind = $1 AND id = $2
                    "#,
                )
                .bind(kind.as_str())
                .bind(id)
                .bind(DocumentStatus::Error.as_str())
                .bind(i32::from(code))
                .bind(message)
                .bind(at)
                .execute(self.pool())
                .await
            }
        };

        let result = query.map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
