use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use sluice_core::{AccessKeyId, EntityKind, Error, SecretAccessKey, Username};

use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

pub async fn list_user_credentials(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
    Query(query): Query<dto::PaginationQuery>,
) -> ApiResult<Json<dto::ListResponse<dto::CredentialResponse>>> {
    let username = Username::new(user)?;
    let page = query.to_page_request()?;
    let listing = services.store.list_user_credentials(&username, &page).await?;
    Ok(Json(dto::map_page(listing, dto::CredentialResponse::from)))
}

/// Issue a credential. The secret is only ever returned here and by
/// [`lookup_credential`].
pub async fn create_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user): Path<String>,
    Query(query): Query<dto::CreateCredentialsQuery>,
) -> ApiResult<impl IntoResponse> {
    let username = Username::new(user)?;
    let imported = match (query.access_key, query.secret_key) {
        (Some(key), Some(secret)) if !secret.is_empty() => {
            Some((AccessKeyId::new(key)?, SecretAccessKey::new(secret)))
        }
        (None, None) => None,
        _ => {
            return Err(Error::validation("access_key and secret_key must be given together").into());
        }
    };
    let credential = services.issue_credential(&username, imported).await?;
    Ok((
        StatusCode::CREATED,
        Json(dto::CredentialWithSecretResponse::from(credential)),
    ))
}

pub async fn get_user_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user, key)): Path<(String, String)>,
) -> ApiResult<Json<dto::CredentialResponse>> {
    let username = Username::new(user)?;
    let access_key_id = AccessKeyId::new(key)?;
    let credential = services
        .store
        .get_user_credential(&username, &access_key_id)
        .await?
        .ok_or_else(|| Error::not_found(EntityKind::Credential, &access_key_id))?;
    Ok(Json(credential.into()))
}

pub async fn delete_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    services
        .store
        .delete_credential(&Username::new(user)?, &AccessKeyId::new(key)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve an access key to its secret and owner.
pub async fn lookup_credential(
    Extension(services): Extension<Arc<AppServices>>,
    Path(key): Path<String>,
) -> ApiResult<Json<dto::CredentialWithSecretResponse>> {
    let access_key_id = AccessKeyId::new(key)?;
    let credential = services
        .store
        .get_credential(&access_key_id)
        .await?
        .ok_or_else(|| Error::not_found(EntityKind::Credential, &access_key_id))?;
    Ok(Json(credential.into()))
}
