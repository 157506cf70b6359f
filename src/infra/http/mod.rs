//! HTTP surfaces: the public API with the notification gateway, and the internal print listener.

pub mod api;
mod gateway;
mod internal;
mod middleware;

pub use api::{ApiState, build_api_router};
pub use gateway::GatewaySettings;
pub use internal::{InternalState, build_internal_router};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::error::{ErrorReport, HttpError};
use crate::application::repos::RepoError;

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

/// Map a repository error onto the plain-text internal surface.
///
/// The render page only distinguishes "no such document" from "try again later".
pub fn repo_error_to_http(source: &'static str, err: RepoError) -> HttpError {
    match err {
        RepoError::NotFound => HttpError::from_error(
            source,
            StatusCode::NOT_FOUND,
            "Resource not found",
            &err,
        ),
        err if err.is_transient() => HttpError::from_error(
            source,
            StatusCode::SERVICE_UNAVAILABLE,
            "Storage temporarily unavailable",
            &err,
        ),
        err => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Persistence error",
            &err,
        ),
    }
}
