//! Per-user notification fan-out for terminal job outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use metrics::counter;
use pressroom_api_types::{NotificationMessage, NotificationStatus, NotificationTarget};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::domain::codes::ErrorCode;
use crate::domain::types::ResourceKind;

const METRIC_PUBLISH_FAILED: &str = "pressroom_notifications_publish_failed_total";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification could not be encoded: {0}")]
    Encode(String),
}

pub type NotificationStream = BoxStream<'static, NotificationMessage>;

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, owner_id: i64, message: &NotificationMessage)
    -> Result<(), NotifyError>;
}

#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    /// Stream of every message published to `owner_id` from now on.
    async fn subscribe(&self, owner_id: i64) -> Result<NotificationStream, NotifyError>;
}

const USER_CHANNEL_PREFIX: &str = "pressroom_user_";

/// Channel carrying every notification for one owner.
pub fn user_channel(owner_id: i64) -> String {
    format!("{USER_CHANNEL_PREFIX}{owner_id}")
}

/// Inverse of [`user_channel`].
pub fn owner_channel(channel: &str) -> Option<i64> {
    channel.strip_prefix(USER_CHANNEL_PREFIX)?.parse().ok()
}

pub fn notification_target(kind: ResourceKind, id: i64) -> NotificationTarget {
    match kind {
        ResourceKind::Resume => NotificationTarget::Resume(id),
        ResourceKind::Template => NotificationTarget::Template(id),
    }
}

/// Success event; carries the resource-missing code when assets were dropped.
pub fn completed_message(
    target: NotificationTarget,
    correlation_id: &str,
    missing_keys: Vec<String>,
) -> NotificationMessage {
    let error_code = (!missing_keys.is_empty()).then(|| ErrorCode::ResourceMissing.code());
    NotificationMessage {
        status: NotificationStatus::Completed,
        target,
        correlation_id: correlation_id.to_string(),
        error_code,
        error_message: None,
        missing_keys,
    }
}

pub fn error_message(
    target: NotificationTarget,
    correlation_id: &str,
    code: ErrorCode,
    message: impl Into<String>,
) -> NotificationMessage {
    NotificationMessage {
        status: NotificationStatus::Error,
        target,
        correlation_id: correlation_id.to_string(),
        error_code: Some(code.code()),
        error_message: Some(message.into()),
        missing_keys: Vec::new(),
    }
}

/// Publish without waiting on the transport; failures are logged and counted.
pub fn publish_detached(
    publisher: Arc<dyn NotificationPublisher>,
    owner_id: i64,
    message: NotificationMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = publisher.publish(owner_id, &message).await {
            counter!(METRIC_PUBLISH_FAILED).increment(1);
            warn!(
                target = "pressroom::application::notify",
                owner_id,
                correlation_id = %message.correlation_id,
                error = %err,
                "Failed to publish job notification"
            );
        }
    })
}
