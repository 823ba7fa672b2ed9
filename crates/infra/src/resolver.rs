//! Effective policy resolution.
//!
//! A user's policies come from two sources: policies attached to the user
//! directly, and policies attached to any group the user belongs to. The
//! resolver turns a [`PolicyScope`] into a [`PolicyQuery`] naming which sources
//! to combine; each backend evaluates the sources and takes their **set**
//! union (a policy reachable both ways appears once) before keyset pagination
//! is applied over policy names.

use sluice_core::Username;

/// Which policies of a user to list.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum PolicyScope {
    /// Only policies attached to the user.
    #[default]
    Direct,
    /// Direct policies plus policies inherited through group membership.
    Effective,
}

impl PolicyScope {
    pub fn from_effective_flag(effective: bool) -> Self {
        if effective {
            Self::Effective
        } else {
            Self::Direct
        }
    }
}

/// One way a policy can reach a user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PolicySource {
    /// user -> user_policy -> policy
    Direct,
    /// user -> user_group -> group_policy -> policy
    ViaGroups,
}

/// Composed policy lookup for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyQuery {
    username: Username,
    sources: Vec<PolicySource>,
}

impl PolicyQuery {
    pub fn new(username: Username, scope: PolicyScope) -> Self {
        let sources = match scope {
            PolicyScope::Direct => vec![PolicySource::Direct],
            PolicyScope::Effective => vec![PolicySource::Direct, PolicySource::ViaGroups],
        };
        Self { username, sources }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Sources to union. Never empty.
    pub fn sources(&self) -> &[PolicySource] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_scope_uses_a_single_source() {
        let q = PolicyQuery::new(Username::new("alice").unwrap(), PolicyScope::Direct);
        assert_eq!(q.sources(), &[PolicySource::Direct]);
    }

    #[test]
    fn effective_scope_adds_group_inheritance() {
        let q = PolicyQuery::new(Username::new("alice").unwrap(), PolicyScope::Effective);
        assert_eq!(q.sources(), &[PolicySource::Direct, PolicySource::ViaGroups]);
        assert_eq!(q.username().as_str(), "alice");
    }

    #[test]
    fn scope_follows_effective_flag() {
        assert_eq!(PolicyScope::from_effective_flag(true), PolicyScope::Effective);
        assert_eq!(PolicyScope::from_effective_flag(false), PolicyScope::Direct);
        assert_eq!(PolicyScope::default(), PolicyScope::Direct);
    }
}
