use std::sync::Arc;

use sluice_auth::{CredentialGenerator, GeneratedKeys, RandomCredentialGenerator};
use sluice_core::{
    AccessKeyId, Credential, Error, GroupName, NewUser, Result, SecretAccessKey, Username,
};
use sluice_infra::{Association, EntityStore, InMemoryEntityStore, PostgresEntityStore};

use crate::config::PostgresConfig;

/// Group every superuser created by the CLI belongs to.
pub const ADMINS_GROUP: &str = "Admins";

/// Everything a handler needs, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn EntityStore>,
    pub keys: Arc<dyn CredentialGenerator>,
}

impl AppServices {
    pub fn new(store: Arc<dyn EntityStore>, keys: Arc<dyn CredentialGenerator>) -> Self {
        Self { store, keys }
    }

    /// Volatile store with random keys. For tests and local experiments.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(RandomCredentialGenerator),
        )
    }

    /// Connect to Postgres and bring the schema up to date.
    pub async fn postgres(config: &PostgresConfig) -> Result<Self> {
        let store = PostgresEntityStore::connect(&config.connection_string, config.max_connections).await?;
        store.migrate().await?;
        Ok(Self::new(Arc::new(store), Arc::new(RandomCredentialGenerator)))
    }

    /// Create a credential for `username`, with fresh keys unless an
    /// imported pair is supplied.
    pub async fn issue_credential(
        &self,
        username: &Username,
        imported: Option<(AccessKeyId, SecretAccessKey)>,
    ) -> Result<Credential> {
        let GeneratedKeys {
            access_key_id,
            secret_access_key,
        } = match imported {
            Some((access_key_id, secret_access_key)) => GeneratedKeys {
                access_key_id,
                secret_access_key,
            },
            None => self.keys.generate()?,
        };
        self.store
            .create_credential(username, access_key_id, secret_access_key)
            .await
    }

    /// Make `username` an administrator and hand back a new credential.
    ///
    /// Re-running for the same user reuses the user, the group and the
    /// membership; only the credential is new.
    pub async fn ensure_superuser(&self, username: &Username) -> Result<Credential> {
        match self.store.create_user(NewUser::new(username.clone())).await {
            Ok(_) => tracing::info!(user = %username, "created superuser"),
            Err(Error::Conflict(_)) => tracing::info!(user = %username, "superuser already exists"),
            Err(e) => return Err(e),
        }

        let admins = GroupName::new(ADMINS_GROUP)?;
        match self.store.create_group(&admins).await {
            Ok(_) => tracing::info!(group = ADMINS_GROUP, "created group"),
            Err(Error::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        self.store
            .add_association(Association::UserGroup {
                user: username.clone(),
                group: admins,
            })
            .await?;

        self.issue_credential(username, None).await
    }
}
