//! Entity records as returned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};
use crate::id::{AccessKeyId, GroupName, PolicyName, Username};
use crate::policy::PolicyDocument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub friendly_name: Option<String>,
    pub source: Option<String>,
    pub creation_date: DateTime<Utc>,
}

/// User creation payload. `creation_date` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: Username,
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub friendly_name: Option<String>,
    pub source: Option<String>,
}

impl NewUser {
    pub fn new(username: Username) -> Self {
        Self {
            username,
            email: None,
            external_id: None,
            friendly_name: None,
            source: None,
        }
    }

    pub fn into_user(self, creation_date: DateTime<Utc>) -> User {
        User {
            username: self.username,
            email: self.email,
            external_id: self.external_id,
            friendly_name: self.friendly_name,
            source: self.source,
            creation_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: GroupName,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: PolicyName,
    pub document: PolicyDocument,
    pub creation_date: DateTime<Utc>,
}

/// Policy creation payload.
///
/// Imports may carry the original `creation_date`; otherwise the store
/// assigns the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPolicy {
    pub name: PolicyName,
    pub document: PolicyDocument,
    pub creation_date: Option<DateTime<Utc>>,
}

impl NewPolicy {
    pub fn into_policy(self, now: DateTime<Utc>) -> Policy {
        Policy {
            name: self.name,
            document: self.document,
            creation_date: self.creation_date.unwrap_or(now),
        }
    }
}

/// Secret half of a credential. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretAccessKey(String);

impl SecretAccessKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for SecretAccessKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecretAccessKey(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_key_id: AccessKeyId,
    pub secret_access_key: SecretAccessKey,
    pub creation_date: DateTime<Utc>,
    /// Owning user.
    pub username: Username,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn key(&self) -> &str {
        self.username.as_str()
    }
}

impl Entity for Group {
    const KIND: EntityKind = EntityKind::Group;

    fn key(&self) -> &str {
        self.name.as_str()
    }
}

impl Entity for Policy {
    const KIND: EntityKind = EntityKind::Policy;

    fn key(&self) -> &str {
        self.name.as_str()
    }
}

impl Entity for Credential {
    const KIND: EntityKind = EntityKind::Credential;

    fn key(&self) -> &str {
        self.access_key_id.as_str()
    }
}
