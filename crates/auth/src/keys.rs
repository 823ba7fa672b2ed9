//! Access key generation.
//!
//! Keys follow the AWS-style shape lakeFS clients expect: a 20 character
//! access key id `AKIAJ` + 14 × `[A-Z0-9]` + `Q`, and a 40 character secret
//! (standard base64 of 30 random bytes).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{Rng, RngCore};

use sluice_core::{AccessKeyId, Result, SecretAccessKey};

const ACCESS_KEY_PREFIX: &str = "AKIAJ";
const ACCESS_KEY_SUFFIX: &str = "Q";
const ACCESS_KEY_RANDOM_LEN: usize = 14;
const ACCESS_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SECRET_BYTES: usize = 30;

/// A freshly generated key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeys {
    pub access_key_id: AccessKeyId,
    pub secret_access_key: SecretAccessKey,
}

pub trait CredentialGenerator: Send + Sync {
    fn generate(&self) -> Result<GeneratedKeys>;
}

/// Generator backed by the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCredentialGenerator;

impl CredentialGenerator for RandomCredentialGenerator {
    fn generate(&self) -> Result<GeneratedKeys> {
        let mut rng = rand::thread_rng();

        let body: String = (0..ACCESS_KEY_RANDOM_LEN)
            .map(|_| ACCESS_KEY_ALPHABET[rng.gen_range(0..ACCESS_KEY_ALPHABET.len())] as char)
            .collect();
        let access_key_id = AccessKeyId::new(format!("{ACCESS_KEY_PREFIX}{body}{ACCESS_KEY_SUFFIX}"))?;

        let mut secret = [0u8; SECRET_BYTES];
        rng.fill_bytes(&mut secret);

        Ok(GeneratedKeys {
            access_key_id,
            secret_access_key: SecretAccessKey::new(STANDARD.encode(secret)),
        })
    }
}
