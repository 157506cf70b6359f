use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{
    StatusCode,
    header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
};
use axum::response::{IntoResponse, Response};
use pressroom_api_types::{
    DownloadFileQuery, DownloadLinkResponse, GenerateRequest, GenerationAccepted,
};

use crate::application::auth::Principal;
use crate::domain::types::ResourceKind;
use crate::infra::http::db_health_response;

use super::error::ApiError;
use super::state::ApiState;

fn resource_kind(segment: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::from_path_segment(segment).ok_or_else(|| ApiError::not_found("Unknown resource"))
}

pub async fn generate(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path((resource, id)): Path<(String, i64)>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = resource_kind(&resource)?;
    let submitted = state
        .generation
        .submit(
            principal.user_id,
            kind,
            id,
            &request.correlation_id,
            request.output,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationAccepted {
            job_id: submitted.job_id,
            correlation_id: submitted.correlation_id,
        }),
    ))
}

pub async fn download_link(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path((resource, id)): Path<(String, i64)>,
) -> Result<Json<DownloadLinkResponse>, ApiError> {
    let kind = resource_kind(&resource)?;
    let issued = state.downloads.issue(principal.user_id, kind, id).await?;

    Ok(Json(DownloadLinkResponse {
        token: issued.token,
        owner_id: issued.owner_id,
        expires_in: issued.expires_in.as_secs(),
    }))
}

/// Unauthenticated; the token is the only credential. Malformed queries get the same answer
/// as a spent token.
pub async fn download_file(
    State(state): State<ApiState>,
    Path((resource, id)): Path<(String, i64)>,
    query: Result<Query<DownloadFileQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let kind = resource_kind(&resource)?;
    let Ok(Query(query)) = query else {
        return Err(ApiError::link_expired());
    };

    let artifact = state
        .downloads
        .redeem(query.uid, kind, id, &query.token)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    Ok((
        [
            (CONTENT_TYPE, artifact.content_type),
            (CONTENT_DISPOSITION, disposition),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
        artifact.bytes,
    )
        .into_response())
}

pub async fn health(State(state): State<ApiState>) -> Response {
    db_health_response(state.db.health_check().await)
}
