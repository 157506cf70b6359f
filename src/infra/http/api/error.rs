use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::download_tokens::DownloadError;
use crate::application::error::ErrorReport;
use crate::application::generation::GenerationError;
use crate::application::rate_limit::RateLimitError;
use crate::application::repos::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const PASSWORD_RESET_REQUIRED: &str = "password_reset_required";
    pub const NOT_FOUND: &str = "not_found";
    pub const NOT_READY: &str = "not_ready";
    pub const LINK_EXPIRED: &str = "link_expired";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const LOCKED: &str = "locked";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const STORAGE: &str = "storage_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Valid session token required",
            None,
        )
    }

    pub fn password_reset_required() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::PASSWORD_RESET_REQUIRED,
            "Password must be changed before continuing",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    /// The single response for every unusable download token.
    pub fn link_expired() -> Self {
        Self::new(
            StatusCode::GONE,
            codes::LINK_EXPIRED,
            "Download link expired",
            None,
        )
    }

    pub fn rate_limited(code: &'static str, retry_after: u64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                code,
                "Rate limit exceeded",
                Some(format!("Retry after {retry_after} seconds")),
            )
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                None,
            ),
            other => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                Some(other.to_string()),
            ),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        let retry_after = err.retry_after().map(|after| after.as_secs().max(1));
        match (err, retry_after) {
            (RateLimitError::Repo(repo), _) => repo.into(),
            (RateLimitError::Locked { .. }, Some(after)) => Self::rate_limited(codes::LOCKED, after),
            (_, after) => Self::rate_limited(codes::RATE_LIMITED, after.unwrap_or(1)),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Validation(message) => {
                Self::bad_request("Invalid generation request", Some(message))
            }
            GenerationError::NotFound => Self::not_found("Document not found"),
            GenerationError::RateLimited(limit) => limit.into(),
            GenerationError::Repo(repo) => repo.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound => Self::not_found("Document not found"),
            DownloadError::NotReady => Self::new(
                StatusCode::CONFLICT,
                codes::NOT_READY,
                "Document has no generated artifact yet",
                None,
            ),
            DownloadError::Expired => Self::link_expired(),
            DownloadError::Repo(repo) => repo.into(),
            DownloadError::Storage(storage) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Artifact could not be read",
                Some(storage.to_string()),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(self.message)
        );
        // Internal failure details stay in the logs.
        let hint = if self.status.is_server_error() {
            None
        } else {
            self.hint
        };
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        ErrorReport::from_message("infra::http::api", self.status, detail).attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::rate_limit::RateLimitAction;

    #[test]
    fn every_token_failure_maps_to_gone() {
        let err = ApiError::from(DownloadError::Expired);
        assert_eq!(err.status(), StatusCode::GONE);
        assert_eq!(err.code, codes::LINK_EXPIRED);
    }

    #[test]
    fn rate_limits_carry_retry_after() {
        let response = ApiError::from(RateLimitError::Limited {
            action: RateLimitAction::Generate,
            retry_after: Duration::from_secs(90),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("90")
        );
    }
}
