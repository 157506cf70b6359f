pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::gateway;
use crate::infra::http::middleware::{log_responses, set_request_context};

pub fn build_api_router(state: ApiState) -> Router {
    let authenticated = Router::new()
        .route(
            "/api/v1/{resource}/{id}/generate",
            post(handlers::generate),
        )
        .route(
            "/api/v1/{resource}/{id}/download-link",
            get(handlers::download_link),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    Router::new()
        .merge(authenticated)
        .route(
            "/api/v1/{resource}/{id}/download-file",
            get(handlers::download_file),
        )
        .route("/ws", get(gateway::notifications_socket))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
