//! Natural keys.
//!
//! Natural keys are the only identifiers that leave the store: they appear in
//! responses and serve as pagination cursors. Surrogate row ids stay internal.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Longest accepted natural key, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Username (natural key of a user).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

/// Group name (natural key of a group).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

/// Policy name (natural key of a policy).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyName(String);

/// Access key id (natural key of a credential).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKeyId(String);

fn validate_key(what: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::validation(format!("{what} must not be empty")));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(Error::validation(format!(
            "{what} exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::validation(format!(
            "{what} contains control characters"
        )));
    }
    Ok(())
}

macro_rules! impl_natural_key {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Validate and wrap a key.
            pub fn new(value: impl Into<String>) -> Result<Self, Error> {
                let value = value.into();
                validate_key($name, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_natural_key!(Username, "username");
impl_natural_key!(GroupName, "group name");
impl_natural_key!(PolicyName, "policy name");
impl_natural_key!(AccessKeyId, "access key id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_keys() {
        assert!(matches!(Username::new(""), Err(Error::Validation(_))));
        assert!(matches!(
            GroupName::new("g".repeat(MAX_KEY_LEN + 1)),
            Err(Error::Validation(_))
        ));
        assert!(GroupName::new("g".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(matches!(PolicyName::new("read\nall"), Err(Error::Validation(_))));
    }

    #[test]
    fn deserialization_validates() {
        let ok: Username = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");
        assert!(serde_json::from_str::<Username>("\"\"").is_err());
    }

    #[test]
    fn orders_bytewise() {
        let mut keys = vec![
            Username::new("bob").unwrap(),
            Username::new("Zed").unwrap(),
            Username::new("alice").unwrap(),
        ];
        keys.sort();
        let keys: Vec<_> = keys.iter().map(Username::as_str).collect();
        assert_eq!(keys, ["Zed", "alice", "bob"]);
    }
}
