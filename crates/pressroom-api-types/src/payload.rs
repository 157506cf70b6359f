use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Item type whose `content` references a stored object that must be inlined before rendering.
pub const IMAGE_ITEM_TYPE: &str = "image";

/// Warning code attached when a referenced object could not be resolved.
pub const RESOURCE_MISSING_CODE: u16 = 4004;

/// Self-contained document handed to the render target page.
///
/// Image items carry a `data:` URI in `content` once assembled; the stored layout only ever
/// holds object keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPayload {
    #[serde(default)]
    pub layout_settings: Value,
    #[serde(default)]
    pub items: Vec<PrintItem>,
    #[serde(default)]
    pub warnings: Vec<PrintWarning>,
}

impl RenderPayload {
    /// Object keys that were dropped while assembling the payload.
    pub fn missing_keys(&self) -> Vec<String> {
        self.warnings
            .iter()
            .filter(|warning| warning.code == RESOURCE_MISSING_CODE)
            .map(|warning| warning.key.clone())
            .collect()
    }
}

/// A positioned content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    pub layout: ItemLayout,
    #[serde(default)]
    pub style: Value,
}

impl PrintItem {
    pub fn is_image(&self) -> bool {
        self.kind == IMAGE_ITEM_TYPE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemLayout {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintWarning {
    pub code: u16,
    pub key: String,
}

impl PrintWarning {
    pub fn resource_missing(key: impl Into<String>) -> Self {
        Self {
            code: RESOURCE_MISSING_CODE,
            key: key.into(),
        }
    }
}
