//! Object storage seam used by the assembler (reads) and the job handlers (writes).

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::types::{ArtifactSlot, ResourceKind};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("access to object `{0}` denied")]
    AccessDenied(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Writes `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError>;
}

/// Prefix under which an owner's uploaded assets live. Keys outside it are never resolved
/// on that owner's behalf.
pub fn owner_asset_prefix(owner_id: i64) -> String {
    format!("user-assets/{owner_id}/")
}

/// Deterministic key for a rendered artifact, so reprocessing overwrites in place.
pub fn artifact_key(owner_id: i64, kind: ResourceKind, id: i64, slot: ArtifactSlot) -> String {
    format!(
        "generated/{owner_id}/{}/{id}.{}",
        kind.as_str(),
        slot.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_keys_are_stable_per_target() {
        let first = artifact_key(7, ResourceKind::Resume, 42, ArtifactSlot::Pdf);
        let second = artifact_key(7, ResourceKind::Resume, 42, ArtifactSlot::Pdf);
        assert_eq!(first, "generated/7/resume/42.pdf");
        assert_eq!(first, second);
    }
}
