use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audience every accepted token must carry.
pub const AUTH_CLIENT_AUDIENCE: &str = "auth-client";

/// Tolerated clock drift between the token issuer and this service.
const ISSUED_AT_LEEWAY_SECS: i64 = 30;

/// JWT claims presented by the authorization client.
///
/// Timestamps are unix seconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject, if the issuer sets one. Only used for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience. Required, must be [`AUTH_CLIENT_AUDIENCE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiration. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("token is missing required claim '{0}'")]
    MissingClaim(String),

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token signing algorithm is not accepted")]
    UnsupportedAlgorithm,

    #[error("token audience is not 'auth-client'")]
    InvalidAudience,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,
}

/// Deterministically validate decoded claims against `now`.
///
/// Signature verification happens before this, in the validator.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    match claims.aud.as_deref() {
        None => return Err(TokenValidationError::MissingClaim("aud".to_string())),
        Some(aud) if aud != AUTH_CLIENT_AUDIENCE => return Err(TokenValidationError::InvalidAudience),
        Some(_) => {}
    }
    let exp = claims
        .exp
        .ok_or_else(|| TokenValidationError::MissingClaim("exp".to_string()))?;
    let now = now.timestamp();
    if let Some(iat) = claims.iat {
        if iat > now + ISSUED_AT_LEEWAY_SECS {
            return Err(TokenValidationError::NotYetValid);
        }
    }
    if now >= exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
