use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sluice_core::Error;

/// Handler result. Store errors convert with `?`.
pub type ApiResult<T> = Result<T, ApiError>;

/// Store/core error carried to the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        store_error_to_response(self.0)
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvariantViolation(_) | Error::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn store_error_to_response(err: Error) -> Response {
    let status = status_for(&err);
    match &err {
        Error::Transient(_) => tracing::warn!(error = %err, "request failed, retryable"),
        Error::InvariantViolation(_) | Error::Backend(_) => tracing::error!(error = %err, "request failed"),
        _ => tracing::debug!(error = %err, "request rejected"),
    }
    json_error(status, err.to_string())
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "message": message.into() }))).into_response()
}
