use axum::{http::StatusCode, Json};

use crate::app::dto::VersionResponse;

pub async fn healthcheck() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}
