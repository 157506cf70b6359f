use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::application::auth::AuthError;

use super::error::ApiError;
use super::state::ApiState;

/// Verifies the bearer session token and exposes the [`Principal`] to handlers.
///
/// [`Principal`]: crate::application::auth::Principal
pub async fn require_session(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_token(request.headers().get(AUTHORIZATION)).unwrap_or_default();

    let principal = match state.sessions.verify(token) {
        Ok(principal) => principal,
        Err(AuthError::PasswordResetRequired) => {
            return ApiError::password_reset_required().into_response();
        }
        Err(AuthError::Missing) | Err(AuthError::Invalid) => {
            return ApiError::unauthorized().into_response();
        }
    };

    request.extensions_mut().insert(principal);
    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    response
}

fn extract_token(header: Option<&HeaderValue>) -> Option<&str> {
    let raw = header?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
}
