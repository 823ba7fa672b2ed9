//! Process configuration, read once from `SLUICE_*` environment variables.
//!
//! Nested keys are joined by `_`, so `auth.encrypt.secret_key` is read from
//! `SLUICE_AUTH_ENCRYPT_SECRET_KEY`.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use sluice_observability::LogFormat;

const ENV_PREFIX: &str = "SLUICE_";

const DEFAULT_LISTEN_ADDRESS: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// HMAC secret used to verify bearer tokens.
    pub secret_key: String,
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig").field("secret_key", &"***").finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

impl core::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("connection_string", &"***")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub auth: AuthConfig,
    pub postgres: PostgresConfig,
    pub listen_address: SocketAddr,
    pub log_format: LogFormat,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `lookup` receives full
    /// variable names (prefix included).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let auth = AuthConfig {
            secret_key: vars.required("AUTH_ENCRYPT_SECRET_KEY")?,
        };

        let postgres = PostgresConfig {
            connection_string: vars.required("DATABASE_POSTGRES_CONNECTION_STRING")?,
            max_connections: vars.parsed("DATABASE_POSTGRES_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
        };
        if postgres.max_connections == 0 {
            return Err(vars.invalid("DATABASE_POSTGRES_MAX_CONNECTIONS", "must be at least 1"));
        }

        let listen_address = vars.parsed("LISTEN_ADDRESS", SocketAddr::from(DEFAULT_LISTEN_ADDRESS))?;

        let log_format = vars.parsed("LOG_FORMAT", LogFormat::default())?;

        let timeout_secs: u64 = vars.parsed("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(vars.invalid("REQUEST_TIMEOUT_SECS", "must be at least 1"));
        }

        Ok(Self {
            auth,
            postgres,
            listen_address,
            log_format,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn name(key: &str) -> String {
        format!("{ENV_PREFIX}{key}")
    }

    /// Unset and blank values are treated alike.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&Self::name(key)).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(Self::name(key)))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: core::str::FromStr,
        T::Err: core::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| self.invalid(key, e.to_string())),
            None => Ok(default),
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            key: Self::name(key),
            reason: reason.into(),
        }
    }
}
