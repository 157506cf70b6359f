//! Notification transports: Postgres `LISTEN/NOTIFY` for multi-process deployments and an
//! in-process broadcast bus for single-node setups and tests.
//!
//! Both fan out through [`OwnerChannels`], one broadcast channel per owner with at least one
//! connected subscriber. The Postgres bus shares a single listener connection per process.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::StreamExt;
use pressroom_api_types::NotificationMessage;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::{OnceCell, broadcast, mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::application::notify::{
    NotificationPublisher, NotificationStream, NotificationSubscriber, NotifyError, owner_channel,
    user_channel,
};

const CHANNEL_CAPACITY: usize = 64;
/// `NOTIFY` rejects payloads of 8000 bytes or more.
const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7_999;
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

fn transport(err: impl std::fmt::Display) -> NotifyError {
    NotifyError::Transport(err.to_string())
}

fn encode(err: serde_json::Error) -> NotifyError {
    NotifyError::Encode(err.to_string())
}

#[derive(Debug)]
enum ListenCommand {
    Listen {
        channel: String,
        ack: oneshot::Sender<Result<(), String>>,
    },
    Unlisten {
        channel: String,
    },
}

type Commands = mpsc::UnboundedSender<ListenCommand>;

/// Live per-owner channels. An entry exists only while it has subscribers.
#[derive(Default)]
struct OwnerChannels {
    senders: DashMap<i64, broadcast::Sender<NotificationMessage>>,
}

impl OwnerChannels {
    /// Adds a subscriber. The first subscriber of an owner also asks the listener, if any,
    /// to `LISTEN` on the owner's channel; the returned receiver resolves once it has.
    fn join(
        &self,
        owner_id: i64,
        listener: Option<&Commands>,
    ) -> (
        broadcast::Receiver<NotificationMessage>,
        Option<oneshot::Receiver<Result<(), String>>>,
    ) {
        match self.senders.entry(owner_id) {
            Entry::Occupied(entry) => (entry.get().subscribe(), None),
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
                entry.insert(sender);
                // Sent under the entry lock so LISTEN and UNLISTEN for one owner stay ordered.
                let ack = listener.map(|commands| {
                    let (ack, done) = oneshot::channel();
                    let _ = commands.send(ListenCommand::Listen {
                        channel: user_channel(owner_id),
                        ack,
                    });
                    done
                });
                (receiver, ack)
            }
        }
    }

    /// Drops the owner's entry once its last receiver is gone.
    fn leave(&self, owner_id: i64, listener: Option<&Commands>) {
        if let Entry::Occupied(entry) = self.senders.entry(owner_id) {
            if entry.get().receiver_count() == 0 {
                entry.remove();
                if let Some(commands) = listener {
                    let _ = commands.send(ListenCommand::Unlisten {
                        channel: user_channel(owner_id),
                    });
                }
            }
        }
    }

    /// Returns whether anyone was subscribed. Never creates an entry.
    fn deliver(&self, owner_id: i64, message: NotificationMessage) -> bool {
        self.senders
            .get(&owner_id)
            .is_some_and(|sender| sender.send(message).is_ok())
    }
}

/// One subscriber's hold on an owner channel, released on drop.
struct Membership {
    channels: Arc<OwnerChannels>,
    listener: Option<Commands>,
    owner_id: i64,
    receiver: Option<broadcast::Receiver<NotificationMessage>>,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.receiver.take();
        self.channels.leave(self.owner_id, self.listener.as_ref());
    }
}

fn membership_stream(mut membership: Membership) -> NotificationStream {
    let owner_id = membership.owner_id;
    stream! {
        while let Some(receiver) = membership.receiver.as_mut() {
            match receiver.recv().await {
                Ok(message) => yield message,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target = "pressroom::infra::notify",
                        owner_id,
                        skipped,
                        "Notification subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    .boxed()
}

/// Serializes `message` for `NOTIFY`, dropping trailing missing keys until it fits in `limit`
/// bytes. The owning document keeps the full list.
fn encode_bounded(message: &NotificationMessage, limit: usize) -> Result<String, NotifyError> {
    let mut payload = serde_json::to_string(message).map_err(encode)?;
    if payload.len() <= limit {
        return Ok(payload);
    }

    let mut trimmed = message.clone();
    while payload.len() > limit {
        let mut overflow = payload.len() - limit;
        while overflow > 0 {
            let Some(key) = trimmed.missing_keys.pop() else {
                return Err(NotifyError::Encode(format!(
                    "notification exceeds {limit} bytes without missing keys"
                )));
            };
            overflow = overflow.saturating_sub(key.len() + 3);
        }
        payload = serde_json::to_string(&trimmed).map_err(encode)?;
    }

    debug!(
        target = "pressroom::infra::notify",
        kept = trimmed.missing_keys.len(),
        dropped = message.missing_keys.len() - trimmed.missing_keys.len(),
        "Trimmed missing keys to fit the notification payload"
    );
    Ok(payload)
}

#[derive(Clone)]
pub struct PgNotificationBus {
    pool: PgPool,
    channels: Arc<OwnerChannels>,
    listener: Arc<OnceCell<Commands>>,
}

impl PgNotificationBus {
    /// The shared listener connection is opened by the first subscription, so publish-only
    /// processes never hold one.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            channels: Arc::new(OwnerChannels::default()),
            listener: Arc::new(OnceCell::new()),
        }
    }

    async fn listener(&self) -> Result<&Commands, NotifyError> {
        self.listener
            .get_or_try_init(|| async {
                let listener = PgListener::connect_with(&self.pool)
                    .await
                    .map_err(transport)?;
                let (commands, inbox) = mpsc::unbounded_channel();
                tokio::spawn(run_listener(listener, inbox, self.channels.clone()));
                Ok(commands)
            })
            .await
    }
}

/// Owns the shared `PgListener`: applies LISTEN/UNLISTEN requests and routes each
/// notification to its owner's channel. Ends when every command sender is gone.
async fn run_listener(
    mut listener: PgListener,
    mut inbox: mpsc::UnboundedReceiver<ListenCommand>,
    channels: Arc<OwnerChannels>,
) {
    loop {
        tokio::select! {
            command = inbox.recv() => match command {
                Some(ListenCommand::Listen { channel, ack }) => {
                    let result = listener.listen(&channel).await.map_err(|err| err.to_string());
                    debug!(
                        target = "pressroom::infra::notify",
                        channel = %channel,
                        ok = result.is_ok(),
                        "Listening for notifications"
                    );
                    let _ = ack.send(result);
                }
                Some(ListenCommand::Unlisten { channel }) => {
                    if let Err(err) = listener.unlisten(&channel).await {
                        warn!(
                            target = "pressroom::infra::notify",
                            channel = %channel,
                            error = %err,
                            "Failed to stop listening"
                        );
                    }
                }
                None => break,
            },
            received = listener.recv() => match received {
                Ok(notification) => {
                    let Some(owner_id) = owner_channel(notification.channel()) else {
                        continue;
                    };
                    match serde_json::from_str::<NotificationMessage>(notification.payload()) {
                        Ok(message) => {
                            channels.deliver(owner_id, message);
                        }
                        Err(err) => warn!(
                            target = "pressroom::infra::notify",
                            owner_id,
                            error = %err,
                            "Dropping undecodable notification"
                        ),
                    }
                }
                Err(err) => {
                    error!(
                        target = "pressroom::infra::notify",
                        error = %err,
                        "Notification listener connection failed"
                    );
                    tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                }
            },
        }
    }
    debug!(target = "pressroom::infra::notify", "Notification listener stopped");
}

#[async_trait]
impl NotificationPublisher for PgNotificationBus {
    async fn publish(
        &self,
        owner_id: i64,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError> {
        let payload = encode_bounded(message, MAX_NOTIFY_PAYLOAD_BYTES)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(user_channel(owner_id))
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSubscriber for PgNotificationBus {
    async fn subscribe(&self, owner_id: i64) -> Result<NotificationStream, NotifyError> {
        let commands = self.listener().await?.clone();
        let (receiver, ack) = self.channels.join(owner_id, Some(&commands));
        let membership = Membership {
            channels: self.channels.clone(),
            listener: Some(commands),
            owner_id,
            receiver: Some(receiver),
        };

        if let Some(ack) = ack {
            ack.await
                .map_err(|_| transport("notification listener stopped"))?
                .map_err(transport)?;
        }
        Ok(membership_stream(membership))
    }
}

/// Per-owner broadcast channels inside one process.
#[derive(Default)]
pub struct LocalNotificationBus {
    channels: Arc<OwnerChannels>,
}

impl LocalNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationPublisher for LocalNotificationBus {
    async fn publish(
        &self,
        owner_id: i64,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError> {
        // Nobody connected for this owner is not an error.
        self.channels.deliver(owner_id, message.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationSubscriber for LocalNotificationBus {
    async fn subscribe(&self, owner_id: i64) -> Result<NotificationStream, NotifyError> {
        let (receiver, _) = self.channels.join(owner_id, None);
        Ok(membership_stream(Membership {
            channels: self.channels.clone(),
            listener: None,
            owner_id,
            receiver: Some(receiver),
        }))
    }
}
