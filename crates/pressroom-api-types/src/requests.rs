use serde::{Deserialize, Serialize};

/// Artifact flavour requested at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Pdf,
    Preview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub correlation_id: String,
    #[serde(default)]
    pub output: Option<OutputKind>,
}

/// Body of the `202 Accepted` response; `correlation_id` is echoed for notification filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAccepted {
    pub job_id: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinkResponse {
    pub token: String,
    pub owner_id: i64,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadFileQuery {
    pub uid: i64,
    pub token: String,
}
