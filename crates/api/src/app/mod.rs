//! HTTP API application wiring (axum router + service wiring).
//!
//! - `services.rs`: store and key generator handles shared by handlers
//! - `routes/`: HTTP routes + handlers (one file per entity family)
//! - `dto.rs`: request/response DTOs and page mapping
//! - `errors.rs`: error to status mapping

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use sluice_auth::JwtValidator;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Path prefix of every endpoint.
pub const API_BASE: &str = "/api/v1";

/// Build the full HTTP router.
pub fn build_app(
    services: Arc<services::AppServices>,
    jwt: Arc<dyn JwtValidator>,
    request_timeout: Duration,
) -> Router {
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    let api = Router::new()
        .route("/healthcheck", get(routes::system::healthcheck))
        .merge(protected);

    Router::new().nest(API_BASE, api).layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::trace_requests))
            .layer(axum::middleware::from_fn_with_state(
                request_timeout,
                middleware::enforce_timeout,
            )),
    )
}
