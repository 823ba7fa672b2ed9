//! Error taxonomy shared by the store, the resolver and the API layer.

use thiserror::Error;

use crate::entity::EntityKind;

/// Result type used across sluice crates.
pub type Result<T> = core::result::Result<T, Error>;

/// Failure kinds surfaced by the core.
///
/// "Absent" lookups are not errors: `get_*` operations return `Ok(None)`.
/// `NotFound` is reserved for mutations whose target (or association
/// endpoint) does not exist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An entity or association endpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A natural key is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A payload or key was malformed. Raised before reaching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connectivity, timeout or serialization failure. Safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A multi-step mutation failed part-way and was rolled back.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Any other store failure.
    #[error("store failure: {0}")]
    Backend(String),
}

impl Error {
    pub fn not_found(kind: EntityKind, key: impl core::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} '{key}'"))
    }

    pub fn conflict(kind: EntityKind, key: impl core::fmt::Display) -> Self {
        Self::Conflict(format!("{kind} '{key}' already exists"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Only transient failures may be retried by callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::transient("pool timed out").is_retryable());
        assert!(!Error::backend("syntax error").is_retryable());
        assert!(!Error::conflict(EntityKind::User, "alice").is_retryable());
        assert!(!Error::invariant("cascade failed").is_retryable());
    }

    #[test]
    fn messages_name_the_entity() {
        let err = Error::not_found(EntityKind::Group, "admins");
        assert_eq!(err.to_string(), "not found: group 'admins'");

        let err = Error::conflict(EntityKind::Policy, "read-all");
        assert_eq!(err.to_string(), "conflict: policy 'read-all' already exists");
    }
}
