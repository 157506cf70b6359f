//! Listener reachable only from the render engine: serves assembled payloads to the print page.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router, middleware as axum_middleware};
use pressroom_api_types::RenderPayload;
use tracing::debug;

use crate::application::assembler::{AssembleError, PrintDataAssembler};
use crate::application::error::HttpError;
use crate::application::print_target::{INTERNAL_SECRET_HEADER, PrintTarget};
use crate::application::repos::DocumentsRepo;
use crate::domain::types::ResourceKind;
use crate::infra::db::PostgresRepositories;

use super::middleware::{log_responses, set_request_context};
use super::{db_health_response, repo_error_to_http};

const SOURCE: &str = "infra::http::internal::print_payload";

#[derive(Clone)]
pub struct InternalState {
    pub print_target: PrintTarget,
    pub documents: Arc<dyn DocumentsRepo>,
    pub assembler: PrintDataAssembler,
    pub db: Arc<PostgresRepositories>,
}

pub fn build_internal_router(state: InternalState) -> Router {
    Router::new()
        .route("/internal/{resource}/print/{id}", get(print_payload))
        .route("/health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

/// The secret is accepted from the header only.
async fn print_payload(
    State(state): State<InternalState>,
    Path((resource, id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Json<RenderPayload>, HttpError> {
    let presented = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !state.print_target.verify_secret(presented) {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "internal secret missing or mismatched",
        ));
    }

    let kind = ResourceKind::from_path_segment(&resource).ok_or_else(|| {
        HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Resource not found",
            format!("unknown resource segment `{resource}`"),
        )
    })?;

    let document = state
        .documents
        .find_document(kind, id)
        .await
        .map_err(|err| repo_error_to_http(SOURCE, err))?
        .ok_or_else(|| {
            HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Resource not found",
                format!("{} {id} not found", kind.as_str()),
            )
        })?;

    let payload = state
        .assembler
        .assemble(document.owner_id, &document.layout)
        .await
        .map_err(|err| {
            let status = match err {
                AssembleError::Malformed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AssembleError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            HttpError::from_error(SOURCE, status, "Payload could not be assembled", &err)
        })?;

    debug!(
        target = "pressroom::http::internal",
        kind = kind.as_str(),
        id,
        items = payload.items.len(),
        warnings = payload.warnings.len(),
        "Served print payload"
    );
    Ok(Json(payload))
}

async fn health(State(state): State<InternalState>) -> Response {
    db_health_response(state.db.health_check().await)
}
