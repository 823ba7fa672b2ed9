//! `sluice-auth`: bearer-token verification and credential key generation.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod keys;
pub mod validator;

pub use claims::{JwtClaims, TokenValidationError, validate_claims, AUTH_CLIENT_AUDIENCE};
pub use keys::{CredentialGenerator, GeneratedKeys, RandomCredentialGenerator};
pub use validator::{Hs256JwtValidator, JwtValidator};
