use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Completed,
    Error,
}

/// Document a notification refers to; serialized as `resume_id` or `template_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationTarget {
    #[serde(rename = "resume_id")]
    Resume(i64),
    #[serde(rename = "template_id")]
    Template(i64),
}

/// Job outcome pushed over the persistent client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub status: NotificationStatus,
    #[serde(flatten)]
    pub target: NotificationTarget,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub missing_keys: Vec<String>,
}

/// Frames a client may send on the notification socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
}

/// Client-side filter for one outstanding submission.
///
/// Events are accepted only when both the correlation id handed out at submission time and the
/// tracked document match, so stale events from reconnects or overlapping submissions are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTracker {
    correlation_id: String,
    target: NotificationTarget,
}

impl NotificationTracker {
    pub fn new(correlation_id: impl Into<String>, target: NotificationTarget) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            target,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn accepts(&self, message: &NotificationMessage) -> bool {
        message.correlation_id == self.correlation_id && message.target == self.target
    }

    /// Parse a raw socket frame, returning the message only if this tracker accepts it.
    pub fn filter_frame(&self, frame: &str) -> Option<NotificationMessage> {
        let message: NotificationMessage = serde_json::from_str(frame).ok()?;
        self.accepts(&message).then_some(message)
    }
}
