//! Persisted records handled by the generation pipeline.

use serde::Serialize;
use time::OffsetDateTime;

use super::types::{ArtifactSlot, DocumentStatus, ResourceKind};

/// Owning record of a rendered artifact: a resume or a template.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub kind: ResourceKind,
    pub id: i64,
    pub owner_id: i64,
    pub layout: serde_json::Value,
    pub status: DocumentStatus,
    pub pdf_key: Option<String>,
    pub preview_key: Option<String>,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub missing_keys: Vec<String>,
    pub updated_at: OffsetDateTime,
}

impl DocumentRecord {
    pub fn artifact_key(&self, slot: ArtifactSlot) -> Option<&str> {
        match slot {
            ArtifactSlot::Pdf => self.pdf_key.as_deref(),
            ArtifactSlot::Preview => self.preview_key.as_deref(),
        }
    }
}

/// Stored side of an ephemeral download token; only the hash of the token is persisted.
#[derive(Debug, Clone)]
pub struct DownloadTokenRecord {
    pub token_hash: Vec<u8>,
    pub owner_id: i64,
    pub kind: ResourceKind,
    pub target_id: i64,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutRecord {
    pub failures: u32,
    pub locked_until: Option<OffsetDateTime>,
}
