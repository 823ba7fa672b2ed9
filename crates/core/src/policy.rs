//! Policy documents.
//!
//! A document is persisted as one serialized value keyed by the policy name.
//! The JSON shape (`{"Statement":[{"Resource":..,"Action":[..],"Effect":"allow"}]}`)
//! is the one already stored by existing deployments, so field names are fixed.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Statement effect.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl core::fmt::Display for Effect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Effect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(Error::validation(format!(
                "effect must be 'allow' or 'deny', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "Action")]
    pub action: Vec<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
}

/// Ordered list of statements. Order is significant and preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Statement", default)]
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self { statement }
    }

    /// Serialize for storage.
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        serde_json::to_value(self)
            .map_err(|e| Error::backend(format!("policy document serialization failed: {e}")))
    }

    /// Deserialize a stored document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value)
            .map_err(|e| Error::backend(format!("stored policy document is corrupt: {e}")))
    }
}
