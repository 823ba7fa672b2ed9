use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use sluice_core::{EntityKind, Error, NewPolicy, PolicyName};

use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_policies).post(create_policy))
        .route(
            "/:policy",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
}

pub async fn list_policies(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::PolicyResponse>>> {
    let page = query.to_page_request()?;
    let listing = services.store.list_policies(&page).await?;
    Ok(Json(dto::map_page(listing, dto::PolicyResponse::from)))
}

pub async fn create_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PolicyRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = body
        .name
        .clone()
        .ok_or_else(|| Error::validation("policy name is required"))?;
    let policy = NewPolicy {
        name: PolicyName::new(name)?,
        document: body.document()?,
        creation_date: body.creation_date()?,
    };
    let policy = services.store.create_policy(policy).await?;
    Ok((StatusCode::CREATED, Json(dto::PolicyResponse::from(policy))))
}

pub async fn get_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path(policy): Path<String>,
) -> ApiResult<Json<dto::PolicyResponse>> {
    let name = PolicyName::new(policy)?;
    let policy = services
        .store
        .get_policy(&name)
        .await?
        .ok_or_else(|| Error::not_found(EntityKind::Policy, &name))?;
    Ok(Json(policy.into()))
}

/// Replace the statements of an existing policy. The path names the policy;
/// a `name` in the body must agree with it.
pub async fn update_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path(policy): Path<String>,
    Json(body): Json<dto::PolicyRequest>,
) -> ApiResult<Json<dto::PolicyResponse>> {
    let name = PolicyName::new(policy)?;
    if let Some(body_name) = body.name.as_deref() {
        if body_name != name.as_str() {
            return Err(Error::validation(format!(
                "policy name '{body_name}' does not match path '{name}'"
            ))
            .into());
        }
    }
    let policy = services.store.update_policy(&name, body.document()?).await?;
    Ok(Json(policy.into()))
}

pub async fn delete_policy(
    Extension(services): Extension<Arc<AppServices>>,
    Path(policy): Path<String>,
) -> ApiResult<StatusCode> {
    services.store.delete_policy(&PolicyName::new(policy)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
