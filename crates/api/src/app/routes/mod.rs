use axum::{routing::get, Router};

pub mod credentials;
pub mod groups;
pub mod policies;
pub mod system;
pub mod users;

/// Router for every authenticated endpoint, relative to `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/config/version", get(system::version))
        .route("/auth/credentials/:key", get(credentials::lookup_credential))
        .nest("/auth/users", users::router())
        .nest("/auth/groups", groups::router())
        .nest("/auth/policies", policies::router())
}
