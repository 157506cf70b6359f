//! Builds self-contained render payloads from stored layouts.
//!
//! Image items reference objects by key. The assembler resolves each key through the
//! [`ObjectStore`] and inlines it as a `data:` URI so the render target never fetches
//! assets on its own. Keys that cannot be resolved drop their item and leave a
//! [`PrintWarning`] behind; assembly only fails on a malformed layout or a storage outage.

use std::path::{Component, Path};
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{StreamExt, stream};
use metrics::counter;
use pressroom_api_types::{PrintItem, PrintWarning, RenderPayload};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::storage::{ObjectStore, StorageError, owner_asset_prefix};

const METRIC_MISSING_ASSETS: &str = "pressroom_assembler_missing_assets_total";
const RESOLVE_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("layout is malformed: {0}")]
    Malformed(String),
    #[error("object storage unavailable: {0}")]
    Storage(String),
}

impl AssembleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssembleError::Storage(_))
    }
}

enum Resolution {
    Inlined(PrintItem),
    Missing(String),
}

#[derive(Clone)]
pub struct PrintDataAssembler {
    store: Arc<dyn ObjectStore>,
}

impl PrintDataAssembler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Assemble the payload for `owner_id` from the stored layout value.
    ///
    /// Layouts persisted as JSON text are accepted as well as structured values. Warnings saved
    /// with the layout are discarded; only assets missing now are reported.
    pub async fn assemble(
        &self,
        owner_id: i64,
        layout: &Value,
    ) -> Result<RenderPayload, AssembleError> {
        let parsed = match layout {
            Value::String(raw) => serde_json::from_str::<RenderPayload>(raw),
            other => serde_json::from_value::<RenderPayload>(other.clone()),
        }
        .map_err(|err| AssembleError::Malformed(err.to_string()))?;

        let RenderPayload {
            layout_settings,
            items,
            warnings: _,
        } = parsed;
        let mut warnings = Vec::new();

        let prefix = owner_asset_prefix(owner_id);
        let resolutions: Vec<Result<Resolution, AssembleError>> = stream::iter(items)
            .map(|item| self.resolve_item(&prefix, item))
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut resolved = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            match resolution? {
                Resolution::Inlined(item) => resolved.push(item),
                Resolution::Missing(key) => {
                    counter!(METRIC_MISSING_ASSETS).increment(1);
                    warnings.push(PrintWarning::resource_missing(key));
                }
            }
        }

        debug!(
            target = "pressroom::application::assembler",
            owner_id,
            items = resolved.len(),
            warnings = warnings.len(),
            "Render payload assembled"
        );

        Ok(RenderPayload {
            layout_settings,
            items: resolved,
            warnings,
        })
    }

    async fn resolve_item(
        &self,
        prefix: &str,
        mut item: PrintItem,
    ) -> Result<Resolution, AssembleError> {
        if !item.is_image() {
            return Ok(Resolution::Inlined(item));
        }

        let key = match &item.content {
            Value::String(key) => key.clone(),
            other => {
                return Err(AssembleError::Malformed(format!(
                    "image item `{}` carries non-string content `{other}`",
                    item.id
                )));
            }
        };

        if !is_owned_key(prefix, &key) {
            warn!(
                target = "pressroom::application::assembler",
                item_id = %item.id,
                key = %key,
                "Image key outside owner namespace"
            );
            return Ok(Resolution::Missing(key));
        }

        match self.store.get(&key).await {
            Ok(object) => {
                let mime = if object.content_type.is_empty() {
                    mime_guess::from_path(&key)
                        .first_or_octet_stream()
                        .essence_str()
                        .to_string()
                } else {
                    object.content_type
                };
                let encoded = STANDARD.encode(&object.bytes);
                item.content = Value::String(format!("data:{mime};base64,{encoded}"));
                Ok(Resolution::Inlined(item))
            }
            Err(StorageError::NotFound(_)) | Err(StorageError::AccessDenied(_)) => {
                warn!(
                    target = "pressroom::application::assembler",
                    item_id = %item.id,
                    key = %key,
                    "Image object could not be resolved"
                );
                Ok(Resolution::Missing(key))
            }
            Err(StorageError::Backend(message)) => Err(AssembleError::Storage(message)),
        }
    }
}

fn is_owned_key(prefix: &str, key: &str) -> bool {
    if !key.starts_with(prefix) || key.len() == prefix.len() || key.contains('\\') {
        return false;
    }
    Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::application::storage::StoredObject;

    #[derive(Default)]
    struct MemoryStore {
        objects: HashMap<String, StoredObject>,
        fail: bool,
    }

    impl MemoryStore {
        fn with(mut self, key: &str, bytes: &'static [u8], content_type: &str) -> Self {
            self.objects.insert(
                key.to_string(),
                StoredObject {
                    bytes: Bytes::from_static(bytes),
                    content_type: content_type.to_string(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
            if self.fail {
                return Err(StorageError::Backend("disk offline".into()));
            }
            self.objects
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn put(&self, _: &str, _: Bytes, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn image(id: &str, key: &str) -> Value {
        json!({
            "id": id,
            "type": "image",
            "content": key,
            "layout": {"x": 0.0, "y": 0.0, "w": 10.0, "h": 10.0},
            "style": {}
        })
    }

    fn assembler(store: MemoryStore) -> PrintDataAssembler {
        PrintDataAssembler::new(Arc::new(store))
    }

    #[tokio::test]
    async fn unresolvable_images_become_warnings() {
        let store = MemoryStore::default()
            .with("user-assets/7/a.png", b"png-a", "image/png")
            .with("user-assets/7/b.jpg", b"jpg-b", "");
        let layout = json!({
            "layoutSettings": {"columns": 12},
            "items": [
                image("1", "user-assets/7/a.png"),
                image("2", "user-assets/7/x.png"),
                image("3", "user-assets/7/b.jpg"),
                image("4", "user-assets/8/a.png"),
                {"id": "5", "type": "text", "content": "hello",
                 "layout": {"x": 1.0, "y": 1.0, "w": 2.0, "h": 2.0}, "style": {}}
            ]
        });

        let payload = assembler(store).assemble(7, &layout).await.expect("assemble");

        let images: Vec<_> = payload.items.iter().filter(|item| item.is_image()).collect();
        assert_eq!(images.len(), 2);
        assert_eq!(payload.items.len(), 3);
        assert_eq!(
            payload.missing_keys(),
            vec!["user-assets/7/x.png", "user-assets/8/a.png"]
        );
        assert!(payload.warnings.iter().all(|w| w.code == 4004));
        assert_eq!(
            images[0].content,
            Value::String(format!("data:image/png;base64,{}", STANDARD.encode(b"png-a")))
        );
        assert!(
            images[1]
                .content
                .as_str()
                .is_some_and(|uri| uri.starts_with("data:image/jpeg;base64,"))
        );
        assert_eq!(payload.layout_settings, json!({"columns": 12}));
    }

    #[tokio::test]
    async fn stored_warnings_are_not_carried_over() {
        let store = MemoryStore::default().with("user-assets/7/a.png", b"png-a", "image/png");
        let layout = json!({
            "items": [image("1", "user-assets/7/a.png"), image("2", "user-assets/7/gone.png")],
            "warnings": [{"code": 4004, "key": "user-assets/7/old.png"}]
        });

        let payload = assembler(store).assemble(7, &layout).await.expect("assemble");

        assert_eq!(payload.missing_keys(), vec!["user-assets/7/gone.png"]);
    }

    #[tokio::test]
    async fn traversal_keys_are_treated_as_missing() {
        let store = MemoryStore::default().with("user-assets/8/a.png", b"x", "image/png");
        let layout = json!({"items": [image("1", "user-assets/7/../8/a.png")]});

        let payload = assembler(store).assemble(7, &layout).await.expect("assemble");

        assert!(payload.items.is_empty());
        assert_eq!(payload.missing_keys(), vec!["user-assets/7/../8/a.png"]);
    }

    #[tokio::test]
    async fn layouts_stored_as_text_are_parsed() {
        let layout = Value::String(r#"{"layoutSettings":{},"items":[]}"#.to_string());
        let payload = assembler(MemoryStore::default())
            .assemble(1, &layout)
            .await
            .expect("assemble");
        assert!(payload.items.is_empty());
    }

    #[tokio::test]
    async fn malformed_layout_is_not_retryable() {
        let layout = Value::String("{not json".to_string());
        let err = assembler(MemoryStore::default())
            .assemble(1, &layout)
            .await
            .expect_err("malformed");
        assert!(matches!(err, AssembleError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn storage_outage_is_retryable() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let layout = json!({"items": [image("1", "user-assets/1/a.png")]});
        let err = assembler(store)
            .assemble(1, &layout)
            .await
            .expect_err("outage");
        assert!(err.is_retryable());
    }
}
