use async_trait::async_trait;

use sluice_core::{
    AccessKeyId, Credential, Group, GroupName, NewPolicy, NewUser, Page, PageRequest, Policy,
    PolicyDocument, PolicyName, Result, SecretAccessKey, User, Username,
};

use crate::resolver::PolicyScope;

/// One page of records plus its pagination metadata.
pub type Listing<T> = (Vec<T>, Page);

/// A many-to-many link between two entities, addressed by natural keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// Group membership.
    UserGroup { user: Username, group: GroupName },
    /// Policy attached directly to a user.
    UserPolicy { user: Username, policy: PolicyName },
    /// Policy attached to a group.
    GroupPolicy { group: GroupName, policy: PolicyName },
}

impl Association {
    pub fn label(&self) -> &'static str {
        match self {
            Association::UserGroup { .. } => "user_group",
            Association::UserPolicy { .. } => "user_policy",
            Association::GroupPolicy { .. } => "group_policy",
        }
    }
}

/// Persistence boundary for users, groups, policies and credentials.
///
/// ## Semantics shared by every backend
///
/// - `get_*` returns `Ok(None)` for a missing key; it is not an error.
/// - `create_*` fails with `Conflict` when the natural key is taken.
/// - `delete_*` fails with `NotFound` when the entity is absent, and clears
///   every association row referencing it (plus owned credentials, for users)
///   in one transaction. A failure part-way leaves everything untouched and is
///   reported as `InvariantViolation`.
/// - Association add/remove fail with `NotFound` if either endpoint is
///   absent. Adding an existing link and removing a missing one both succeed.
/// - Listings apply keyset pagination over the entity's natural key. A scoped
///   listing whose owner does not exist yields an empty page.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn get_user(&self, username: &Username) -> Result<Option<User>>;
    async fn delete_user(&self, username: &Username) -> Result<()>;
    async fn list_users(&self, page: &PageRequest) -> Result<Listing<User>>;

    async fn create_group(&self, name: &GroupName) -> Result<Group>;
    async fn get_group(&self, name: &GroupName) -> Result<Option<Group>>;
    async fn delete_group(&self, name: &GroupName) -> Result<()>;
    async fn list_groups(&self, page: &PageRequest) -> Result<Listing<Group>>;

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy>;
    async fn get_policy(&self, name: &PolicyName) -> Result<Option<Policy>>;
    /// Replace the document of an existing policy.
    async fn update_policy(&self, name: &PolicyName, document: PolicyDocument) -> Result<Policy>;
    async fn delete_policy(&self, name: &PolicyName) -> Result<()>;
    async fn list_policies(&self, page: &PageRequest) -> Result<Listing<Policy>>;

    async fn add_association(&self, association: Association) -> Result<()>;
    async fn remove_association(&self, association: Association) -> Result<()>;

    async fn list_group_members(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<User>>;
    async fn list_user_groups(&self, username: &Username, page: &PageRequest) -> Result<Listing<Group>>;
    async fn list_group_policies(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<Policy>>;
    async fn list_user_policies(
        &self,
        username: &Username,
        scope: PolicyScope,
        page: &PageRequest,
    ) -> Result<Listing<Policy>>;

    async fn create_credential(
        &self,
        username: &Username,
        access_key_id: AccessKeyId,
        secret_access_key: SecretAccessKey,
    ) -> Result<Credential>;
    /// Lookup by access key id alone, regardless of owner.
    async fn get_credential(&self, access_key_id: &AccessKeyId) -> Result<Option<Credential>>;
    /// Lookup restricted to credentials owned by `username`.
    async fn get_user_credential(
        &self,
        username: &Username,
        access_key_id: &AccessKeyId,
    ) -> Result<Option<Credential>>;
    async fn delete_credential(&self, username: &Username, access_key_id: &AccessKeyId) -> Result<()>;
    async fn list_user_credentials(&self, username: &Username, page: &PageRequest) -> Result<Listing<Credential>>;
}
