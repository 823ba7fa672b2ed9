use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sluice_core::{
    Credential, Effect, Error, Group, NewUser, Page, PageRequest, Policy, PolicyDocument,
    PolicyStatement, Result, User, Username,
};

/// Largest page the API hands out.
pub const MAX_PER_PAGE: u32 = 1000;
/// Page size when the client does not ask for one.
pub const DEFAULT_PER_PAGE: u32 = 100;

// -------------------------
// Query parameters
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub prefix: Option<String>,
    pub after: Option<String>,
    pub amount: Option<i64>,
}

impl PaginationQuery {
    pub fn to_page_request(&self) -> Result<PageRequest> {
        page_request(self.prefix.clone(), self.after.clone(), self.amount)
    }
}

/// `GET /auth/users/{user}/policies`. Kept flat: query strings carry every
/// value as text, which does not survive `#[serde(flatten)]`.
#[derive(Debug, Default, Deserialize)]
pub struct UserPoliciesQuery {
    pub prefix: Option<String>,
    pub after: Option<String>,
    pub amount: Option<i64>,
    #[serde(default)]
    pub effective: bool,
}

impl UserPoliciesQuery {
    pub fn to_page_request(&self) -> Result<PageRequest> {
        page_request(self.prefix.clone(), self.after.clone(), self.amount)
    }
}

/// Optional pre-set keys for `POST /auth/users/{user}/credentials`, used when
/// importing credentials from another deployment.
#[derive(Debug, Default, Deserialize)]
pub struct CreateCredentialsQuery {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn page_request(prefix: Option<String>, after: Option<String>, amount: Option<i64>) -> Result<PageRequest> {
    let amount = match amount {
        None => DEFAULT_PER_PAGE,
        Some(a) if a < 0 => return Err(Error::validation(format!("amount must not be negative, got {a}"))),
        Some(a) => a.min(i64::from(MAX_PER_PAGE)) as u32,
    };
    Ok(PageRequest {
        amount: Some(amount),
        prefix,
        after,
    })
}

// -------------------------
// Request bodies
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    #[serde(alias = "friendlyName")]
    pub friendly_name: Option<String>,
    pub source: Option<String>,
    pub external_id: Option<String>,
}

impl CreateUserRequest {
    pub fn into_new_user(self) -> Result<NewUser> {
        Ok(NewUser {
            username: Username::new(self.username)?,
            email: self.email,
            external_id: self.external_id,
            friendly_name: self.friendly_name,
            source: self.source,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementDto {
    pub effect: String,
    pub resource: String,
    pub action: Vec<String>,
}

/// Policy as exchanged over the API. On `PUT` the name comes from the path.
#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub name: Option<String>,
    /// Unix seconds. Honoured on create, for imports.
    pub creation_date: Option<i64>,
    pub statement: Vec<StatementDto>,
}

impl PolicyRequest {
    pub fn document(&self) -> Result<PolicyDocument> {
        if self.statement.is_empty() {
            return Err(Error::validation("policy must have at least one statement"));
        }
        let statement = self
            .statement
            .iter()
            .map(|s| {
                if s.resource.is_empty() {
                    return Err(Error::validation("statement resource must not be empty"));
                }
                if s.action.is_empty() {
                    return Err(Error::validation("statement must list at least one action"));
                }
                Ok(PolicyStatement {
                    resource: s.resource.clone(),
                    action: s.action.clone(),
                    effect: s.effect.parse::<Effect>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PolicyDocument::new(statement))
    }

    pub fn creation_date(&self) -> Result<Option<DateTime<Utc>>> {
        self.creation_date
            .map(|secs| {
                DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| Error::validation(format!("creation_date {secs} is out of range")))
            })
            .transpose()
    }
}

// -------------------------
// Responses
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PaginationDto {
    pub has_more: bool,
    pub max_per_page: u32,
    pub next_offset: String,
    pub results: usize,
}

impl From<Page> for PaginationDto {
    fn from(page: Page) -> Self {
        Self {
            has_more: page.has_more,
            max_per_page: MAX_PER_PAGE,
            next_offset: page.next_offset,
            results: page.results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<R> {
    pub results: Vec<R>,
    pub pagination: PaginationDto,
}

/// Convert one store page into its response shape.
pub fn map_page<T, R>((rows, page): (Vec<T>, Page), f: impl Fn(T) -> R) -> ListResponse<R> {
    ListResponse {
        results: rows.into_iter().map(f).collect(),
        pagination: page.into(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub username: String,
    pub creation_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username.into_inner(),
            creation_date: user.creation_date.timestamp(),
            email: user.email,
            friendly_name: user.friendly_name,
            source: user.source,
            external_id: user.external_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub creation_date: i64,
}

impl From<Group> for GroupResponse {
    fn from(group: Group) -> Self {
        let name = group.name.into_inner();
        Self {
            id: name.clone(),
            name,
            creation_date: group.creation_date.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyResponse {
    pub name: String,
    pub creation_date: i64,
    pub statement: Vec<StatementDto>,
}

impl From<Policy> for PolicyResponse {
    fn from(policy: Policy) -> Self {
        Self {
            name: policy.name.into_inner(),
            creation_date: policy.creation_date.timestamp(),
            statement: policy
                .document
                .statement
                .into_iter()
                .map(|s| StatementDto {
                    effect: s.effect.to_string(),
                    resource: s.resource,
                    action: s.action,
                })
                .collect(),
        }
    }
}

/// Credential without its secret. Used by every listing.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialResponse {
    pub access_key_id: String,
    pub creation_date: i64,
}

impl From<Credential> for CredentialResponse {
    fn from(credential: Credential) -> Self {
        Self {
            access_key_id: credential.access_key_id.into_inner(),
            creation_date: credential.creation_date.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialWithSecretResponse {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub creation_date: i64,
    pub user_name: String,
}

impl From<Credential> for CredentialWithSecretResponse {
    fn from(credential: Credential) -> Self {
        Self {
            access_key_id: credential.access_key_id.into_inner(),
            secret_access_key: credential.secret_access_key.expose().to_string(),
            creation_date: credential.creation_date.timestamp(),
            user_name: credential.username.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}
