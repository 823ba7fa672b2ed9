use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};

use sluice_core::{EntityKind, Error, PolicyName, Username};
use sluice_infra::{Association, PolicyScope};

use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::routes::credentials;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:user", get(get_user).delete(delete_user))
        .route("/:user/groups", get(list_user_groups))
        .route("/:user/policies", get(list_user_policies))
        .route("/:user/policies/:policy", put(attach_policy).delete(detach_policy))
        .route(
            "/:user/credentials",
            get(credentials::list_user_credentials).post(credentials::create_credential),
        )
        .route(
            "/:user/credentials/:key",
            get(credentials::get_user_credential).delete(credentials::delete_credential),
        )
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::UserResponse>>> {
    let page = query.to_page_request()?;
    let listing = services.store.list_users(&page).await?;
    Ok(Json(dto::map_page(listing, dto::UserResponse::from)))
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = services.store.create_user(body.into_new_user()?).await?;
    Ok((StatusCode::CREATED, Json(dto::UserResponse::from(user))))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
) -> ApiResult<Json<dto::UserResponse>> {
    let username = Username::new(user)?;
    let user = services
        .store
        .get_user(&username)
        .await?
        .ok_or_else(|| Error::not_found(EntityKind::User, &username))?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
) -> ApiResult<StatusCode> {
    services.store.delete_user(&Username::new(user)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_user_groups(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::GroupResponse>>> {
    let username = Username::new(user)?;
    let page = query.to_page_request()?;
    let listing = services.store.list_user_groups(&username, &page).await?;
    Ok(Json(dto::map_page(listing, dto::GroupResponse::from)))
}

pub async fn list_user_policies(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
    Query(query): Query<dto::UserPoliciesQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::PolicyResponse>>> {
    let username = Username::new(user)?;
    let page = query.to_page_request()?;
    let scope = PolicyScope::from_effective_flag(query.effective);
    let listing = services.store.list_user_policies(&username, scope, &page).await?;
    Ok(Json(dto::map_page(listing, dto::PolicyResponse::from)))
}

pub async fn attach_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user, policy)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::UserPolicy {
        user: Username::new(user)?,
        policy: PolicyName::new(policy)?,
    };
    services.store.add_association(association).await?;
    Ok(StatusCode::CREATED)
}

pub async fn detach_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user, policy)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::UserPolicy {
        user: Username::new(user)?,
        policy: PolicyName::new(policy)?,
    };
    services.store.remove_association(association).await?;
    Ok(StatusCode::NO_CONTENT)
}
