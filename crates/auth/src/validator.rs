use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{validate_claims, JwtClaims, TokenValidationError, AUTH_CLIENT_AUDIENCE};

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// HMAC validator with a shared secret.
///
/// `HS256`, `HS384` and `HS512` are accepted. Tokens signed with any other
/// algorithm are rejected before signature verification.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_ALGORITHMS.to_vec();
        validation.set_audience(&[AUTH_CLIENT_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        // Expiry is checked in `validate_claims` against the caller's clock.
        validation.validate_exp = false;

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256JwtValidator").finish_non_exhaustive()
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(map_jwt_error)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenValidationError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenValidationError::UnsupportedAlgorithm
        }
        ErrorKind::InvalidAudience => TokenValidationError::InvalidAudience,
        ErrorKind::ExpiredSignature => TokenValidationError::Expired,
        ErrorKind::MissingRequiredClaim(claim) => TokenValidationError::MissingClaim(claim.clone()),
        _ => TokenValidationError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"test-secret";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn mint(alg: Algorithm, secret: &[u8], claims: serde_json::Value) -> String {
        encode(&Header::new(alg), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let token = mint(
            Algorithm::HS256,
            SECRET,
            json!({"aud": "auth-client", "exp": 1_700_000_060, "sub": "lakefs"}),
        );
        let claims = Hs256JwtValidator::new(SECRET).validate(&token, now()).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("lakefs"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = mint(Algorithm::HS256, b"other", json!({"aud": "auth-client", "exp": 1_700_000_060}));
        assert_eq!(
            Hs256JwtValidator::new(SECRET).validate(&token, now()),
            Err(TokenValidationError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_wrong_audience() {
        let token = mint(Algorithm::HS256, SECRET, json!({"aud": "other", "exp": 1_700_000_060}));
        assert_eq!(
            Hs256JwtValidator::new(SECRET).validate(&token, now()),
            Err(TokenValidationError::InvalidAudience)
        );
    }

    #[test]
    fn requires_expiration() {
        let token = mint(Algorithm::HS256, SECRET, json!({"aud": "auth-client"}));
        assert_eq!(
            Hs256JwtValidator::new(SECRET).validate(&token, now()),
            Err(TokenValidationError::MissingClaim("exp".to_string()))
        );
    }

    #[test]
    fn rejects_expired_token() {
        let token = mint(Algorithm::HS256, SECRET, json!({"aud": "auth-client", "exp": 1_699_999_999}));
        assert_eq!(
            Hs256JwtValidator::new(SECRET).validate(&token, now()),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn accepts_every_hmac_variant() {
        for alg in [Algorithm::HS384, Algorithm::HS512] {
            let token = mint(alg, SECRET, json!({"aud": "auth-client", "exp": 1_700_000_060, "sub": "lakefs"}));
            let claims = Hs256JwtValidator::new(SECRET).validate(&token, now()).unwrap();
            assert_eq!(claims.sub.as_deref(), Some("lakefs"), "{alg:?}");
        }
    }

    #[test]
    fn rejects_non_hmac_algorithms() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"aud":"auth-client","exp":1700000060}"#);
        let token = format!("{header}.{payload}.c2lnbmF0dXJl");
        assert_eq!(
            Hs256JwtValidator::new(SECRET).validate(&token, now()),
            Err(TokenValidationError::UnsupportedAlgorithm)
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = Hs256JwtValidator::new(SECRET).validate("not-a-jwt", now()).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }
}
