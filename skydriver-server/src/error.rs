//! Single `ApiError` at the REST boundary: every internal error converts
//! to exactly one HTTP status here (spec.md §7, §9's "result/error-variant
//! at every layer, converted to HTTP status at the outermost handler").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use skydriver_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<String>),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("duplicate document")]
    Duplicate,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    reason: String,
    log_message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::Validation(errors) => (StatusCode::BAD_REQUEST, errors.join("; ")),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "scan not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Duplicate => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "duplicate document insert".to_string(),
            ),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        let body = ErrorBody {
            log_message: self.to_string(),
            reason,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::AlreadyExists(_) => ApiError::Duplicate,
            StoreError::ImmutableFieldConflict(field) => {
                ApiError::Conflict(format!("Cannot change an existing {field}"))
            }
            StoreError::Backend(msg) => ApiError::Internal(msg),
        }
    }
}
