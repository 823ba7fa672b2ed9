use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};

use sluice_core::{EntityKind, Error, GroupName, PolicyName, Username};
use sluice_infra::Association;

use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/:group", get(get_group).delete(delete_group))
        .route("/:group/members", get(list_members))
        .route("/:group/members/:user", put(add_member).delete(remove_member))
        .route("/:group/policies", get(list_group_policies))
        .route("/:group/policies/:policy", put(attach_policy).delete(detach_policy))
}

pub async fn list_groups(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::GroupResponse>>> {
    let page = query.to_page_request()?;
    let listing = services.store.list_groups(&page).await?;
    Ok(Json(dto::map_page(listing, dto::GroupResponse::from)))
}

pub async fn create_group(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let group = services.store.create_group(&GroupName::new(body.id)?).await?;
    Ok((StatusCode::CREATED, Json(dto::GroupResponse::from(group))))
}

pub async fn get_group(
    Extension(services): Extension<Arc<AppServices>>,
    Path(group): Path<String>,
) -> ApiResult<Json<dto::GroupResponse>> {
    let name = GroupName::new(group)?;
    let group = services
        .store
        .get_group(&name)
        .await?
        .ok_or_else(|| Error::not_found(EntityKind::Group, &name))?;
    Ok(Json(group.into()))
}

pub async fn delete_group(
    Extension(services): Extension<Arc<AppServices>>,
    Path(group): Path<String>,
) -> ApiResult<StatusCode> {
    services.store.delete_group(&GroupName::new(group)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    Extension(services): Extension<Arc<AppServices>>,
    Path(group): Path<String>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::UserResponse>>> {
    let name = GroupName::new(group)?;
    let page = query.to_page_request()?;
    let listing = services.store.list_group_members(&name, &page).await?;
    Ok(Json(dto::map_page(listing, dto::UserResponse::from)))
}

pub async fn add_member(
    Extension(services): Extension<Arc<AppServices>>,
    Path((group, user)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::UserGroup {
        user: Username::new(user)?,
        group: GroupName::new(group)?,
    };
    services.store.add_association(association).await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_member(
    Extension(services): Extension<Arc<AppServices>>,
    Path((group, user)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::UserGroup {
        user: Username::new(user)?,
        group: GroupName::new(group)?,
    };
    services.store.remove_association(association).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_group_policies(
    Extension(services): Extension<Arc<AppServices>>,
    Path(group): Path<String>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::PolicyResponse>>> {
    let name = GroupName::new(group)?;
    let page = query.to_page_request()?;
    let listing = services.store.list_group_policies(&name, &page).await?;
    Ok(Json(dto::map_page(listing, dto::PolicyResponse::from)))
}

pub async fn attach_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path((group, policy)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::GroupPolicy {
        group: GroupName::new(group)?,
        policy: PolicyName::new(policy)?,
    };
    services.store.add_association(association).await?;
    Ok(StatusCode::CREATED)
}

pub async fn detach_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path((group, policy)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let association = Association::GroupPolicy {
        group: GroupName::new(group)?,
        policy: PolicyName::new(policy)?,
    };
    services.store.remove_association(association).await?;
    Ok(StatusCode::NO_CONTENT)
}
