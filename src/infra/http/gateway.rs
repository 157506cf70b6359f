//! Notification socket: authenticates with the first frame, then forwards the owner's events.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::gauge;
use pressroom_api_types::ClientFrame;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::auth::{AuthError, Principal, SessionVerifier};
use crate::application::rate_limit::LoginThrottle;

use super::api::ApiState;

const METRIC_WS_CONNECTIONS: &str = "pressroom_ws_connections";

const CLOSE_UNAUTHORIZED: u16 = 4001;
const CLOSE_PASSWORD_RESET: u16 = 4003;
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;
const CLOSE_THROTTLED: u16 = 4029;
const CLOSE_UNAVAILABLE: u16 = 1011;

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::GatewaySettings> for GatewaySettings {
    fn from(settings: &crate::config::GatewaySettings) -> Self {
        Self {
            handshake_timeout: settings.handshake_timeout,
            ping_interval: settings.ping_interval,
        }
    }
}

/// Client IP as seen by the listener, or `unknown` when the router runs without connect info.
pub struct PeerIdentity(pub String);

impl<S: Send + Sync> FromRequestParts<S> for PeerIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(peer))
    }
}

pub async fn notifications_socket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    PeerIdentity(peer): PeerIdentity,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeFailure {
    Throttled,
    Timeout,
    Unauthorized,
    PasswordReset,
    Unavailable,
}

impl HandshakeFailure {
    fn close_frame(self) -> CloseFrame {
        let (code, reason) = match self {
            HandshakeFailure::Throttled => (CLOSE_THROTTLED, "too many failed attempts"),
            HandshakeFailure::Timeout => (CLOSE_HANDSHAKE_TIMEOUT, "authentication timeout"),
            HandshakeFailure::Unauthorized => (CLOSE_UNAUTHORIZED, "unauthorized"),
            HandshakeFailure::PasswordReset => (CLOSE_PASSWORD_RESET, "password reset required"),
            HandshakeFailure::Unavailable => (CLOSE_UNAVAILABLE, "notifications unavailable"),
        };
        CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: ApiState, peer: String) {
    let conn_id = Uuid::new_v4().simple().to_string();

    let admitted = match state.login_throttle.check(&peer).await {
        Ok(()) => {
            match tokio::time::timeout(state.gateway.handshake_timeout, socket.recv()).await {
                Ok(frame) => {
                    admit(&state.sessions, &state.login_throttle, &peer, frame).await
                }
                Err(_) => Err(HandshakeFailure::Timeout),
            }
        }
        Err(err) => {
            debug!(
                target = "pressroom::http::gateway",
                peer = %peer,
                error = %err,
                "Handshake refused by throttle"
            );
            Err(HandshakeFailure::Throttled)
        }
    };

    let principal = match admitted {
        Ok(principal) => principal,
        Err(failure) => {
            info!(
                target = "pressroom::http::gateway",
                conn_id = %conn_id,
                peer = %peer,
                failure = ?failure,
                "Closing unauthenticated socket"
            );
            let _ = socket
                .send(Message::Close(Some(failure.close_frame())))
                .await;
            return;
        }
    };

    let mut events = match state.notifications.subscribe(principal.user_id).await {
        Ok(events) => events,
        Err(err) => {
            warn!(
                target = "pressroom::http::gateway",
                conn_id = %conn_id,
                user_id = principal.user_id,
                error = %err,
                "Notification subscription failed"
            );
            let _ = socket
                .send(Message::Close(Some(
                    HandshakeFailure::Unavailable.close_frame(),
                )))
                .await;
            return;
        }
    };

    info!(
        target = "pressroom::http::gateway",
        conn_id = %conn_id,
        user_id = principal.user_id,
        "Notification socket authenticated"
    );
    gauge!(METRIC_WS_CONNECTIONS).increment(1.0);

    let (mut sink, mut inbound) = socket.split();
    let mut ping = tokio::time::interval(state.gateway.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(
                            target = "pressroom::http::gateway",
                            conn_id = %conn_id,
                            error = %err,
                            "Failed to encode notification"
                        );
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    gauge!(METRIC_WS_CONNECTIONS).decrement(1.0);
    info!(
        target = "pressroom::http::gateway",
        conn_id = %conn_id,
        user_id = principal.user_id,
        "Notification socket closed"
    );
}

/// Validates the first client frame. Bad credentials count against the peer's hourly window and
/// lockout; accounts forced to reset their password are refused without counting.
async fn admit(
    sessions: &SessionVerifier,
    throttle: &LoginThrottle,
    peer: &str,
    frame: Option<Result<Message, axum::Error>>,
) -> Result<Principal, HandshakeFailure> {
    let token = match frame {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(ClientFrame::Auth { token }) => Some(token),
            Err(_) => None,
        },
        _ => None,
    };

    let verified = match token {
        Some(token) => sessions.verify(&token),
        None => Err(AuthError::Missing),
    };

    match verified {
        Ok(principal) => {
            if let Err(err) = throttle.record_success(peer).await {
                warn!(
                    target = "pressroom::http::gateway",
                    error = %err,
                    "Failed to reset handshake failures"
                );
            }
            Ok(principal)
        }
        Err(AuthError::PasswordResetRequired) => Err(HandshakeFailure::PasswordReset),
        Err(AuthError::Missing) | Err(AuthError::Invalid) => {
            match throttle.record_failure(peer).await {
                Ok(true) => info!(
                    target = "pressroom::http::gateway",
                    peer = %peer,
                    "Peer locked out after repeated handshake failures"
                ),
                Ok(false) => {}
                Err(err) => warn!(
                    target = "pressroom::http::gateway",
                    error = %err,
                    "Failed to record handshake failure"
                ),
            }
            Err(HandshakeFailure::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jsonwebtoken::{EncodingKey, Header, encode};
    use time::OffsetDateTime;

    use super::*;
    use crate::application::auth::SessionClaims;
    use crate::application::rate_limit::{LockoutPolicy, RateLimiter, RateLimits};
    use crate::application::testing::MemoryRateLimits;

    fn throttle(threshold: u32) -> LoginThrottle {
        let repo = Arc::new(MemoryRateLimits::default());
        LoginThrottle::new(
            repo.clone(),
            RateLimiter::new(repo, RateLimits::default()),
            LockoutPolicy {
                threshold,
                cooldown: Duration::from_secs(900),
            },
        )
    }

    fn auth_frame(token: &str) -> Option<Result<Message, axum::Error>> {
        let frame = serde_json::to_string(&ClientFrame::Auth {
            token: token.to_string(),
        })
        .expect("frame");
        Some(Ok(Message::Text(frame.into())))
    }

    fn session_token(secret: &str, pwd_reset: bool) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        encode(
            &Header::default(),
            &SessionClaims {
                sub: 7,
                exp: now + 600,
                iat: now,
                pwd_reset,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encode")
    }

    #[tokio::test]
    async fn first_frame_must_carry_a_valid_token() {
        let sessions = SessionVerifier::new("k");
        let throttle = throttle(5);

        let principal = admit(&sessions, &throttle, "ip", auth_frame(&session_token("k", false)))
            .await
            .expect("admitted");
        assert_eq!(principal.user_id, 7);

        assert_eq!(
            admit(&sessions, &throttle, "ip", auth_frame("garbage")).await,
            Err(HandshakeFailure::Unauthorized)
        );
        assert_eq!(
            admit(&sessions, &throttle, "ip", Some(Ok(Message::Text("{}".into())))).await,
            Err(HandshakeFailure::Unauthorized)
        );
        assert_eq!(
            admit(&sessions, &throttle, "ip", None).await,
            Err(HandshakeFailure::Unauthorized)
        );
        assert_eq!(
            admit(&sessions, &throttle, "ip", auth_frame(&session_token("k", true))).await,
            Err(HandshakeFailure::PasswordReset)
        );
    }

    #[tokio::test]
    async fn reconnecting_clients_are_never_throttled() {
        let sessions = SessionVerifier::new("k");
        let throttle = throttle(5);
        let token = session_token("k", false);

        for attempt in 0..25 {
            throttle
                .check("10.0.0.20")
                .await
                .unwrap_or_else(|err| panic!("connection {attempt} refused: {err}"));
            admit(&sessions, &throttle, "10.0.0.20", auth_frame(&token))
                .await
                .expect("admitted");
        }
    }

    #[tokio::test]
    async fn repeated_bad_handshakes_lock_the_peer() {
        let sessions = SessionVerifier::new("k");
        let throttle = throttle(2);

        for _ in 0..2 {
            let _ = admit(&sessions, &throttle, "10.0.0.9", auth_frame("bad")).await;
        }
        assert!(throttle.check("10.0.0.9").await.is_err());
        throttle.check("10.0.0.10").await.expect("other peer");
    }
}
