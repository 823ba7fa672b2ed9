use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use sluice_core::{
    AccessKeyId, Credential, Entity, EntityKind, Error, Group, GroupName, NewPolicy, NewUser,
    PageRequest, Policy, PolicyDocument, PolicyName, Result, SecretAccessKey, User, Username,
};

use super::r#trait::{Association, EntityStore, Listing};
use crate::resolver::{PolicyQuery, PolicyScope, PolicySource};

/// A step of a cascading delete, in execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CascadeStep {
    /// Clear `user_group` rows.
    ClearMemberships,
    /// Clear `user_policy` / `group_policy` rows.
    ClearGrants,
    /// Delete the user's credentials.
    ClearCredentials,
    /// Delete the entity row itself.
    DeleteRow,
}

/// Rows of one entity table: surrogate id -> record, plus a natural-key index.
#[derive(Debug, Clone)]
struct Table<K, V> {
    ids: BTreeMap<K, u64>,
    rows: HashMap<u64, V>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            ids: BTreeMap::new(),
            rows: HashMap::new(),
        }
    }
}

impl<K: Ord, V> Table<K, V> {
    fn id_of(&self, key: &K) -> Option<u64> {
        self.ids.get(key).copied()
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.id_of(key).and_then(|id| self.rows.get(&id))
    }

    fn by_id(&self, id: u64) -> Option<&V> {
        self.rows.get(&id)
    }

    fn insert(&mut self, id: u64, key: K, value: V) {
        self.ids.insert(key, id);
        self.rows.insert(id, value);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let id = self.ids.remove(key)?;
        self.rows.remove(&id)
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }
}

#[derive(Debug, Clone)]
struct OwnedCredential {
    user_id: u64,
    credential: Credential,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: u64,
    users: Table<Username, User>,
    groups: Table<GroupName, Group>,
    policies: Table<PolicyName, Policy>,
    credentials: Table<AccessKeyId, OwnedCredential>,
    /// (user_id, group_id)
    user_groups: BTreeSet<(u64, u64)>,
    /// (user_id, policy_id)
    user_policies: BTreeSet<(u64, u64)>,
    /// (group_id, policy_id)
    group_policies: BTreeSet<(u64, u64)>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_id(&self, username: &Username) -> Result<u64> {
        self.users
            .id_of(username)
            .ok_or_else(|| Error::not_found(EntityKind::User, username))
    }

    fn group_id(&self, name: &GroupName) -> Result<u64> {
        self.groups
            .id_of(name)
            .ok_or_else(|| Error::not_found(EntityKind::Group, name))
    }

    fn policy_id(&self, name: &PolicyName) -> Result<u64> {
        self.policies
            .id_of(name)
            .ok_or_else(|| Error::not_found(EntityKind::Policy, name))
    }

    /// Resolve both endpoints and return the join set plus the id pair.
    fn link(&mut self, association: &Association) -> Result<(&mut BTreeSet<(u64, u64)>, (u64, u64))> {
        match association {
            Association::UserGroup { user, group } => {
                let pair = (self.user_id(user)?, self.group_id(group)?);
                Ok((&mut self.user_groups, pair))
            }
            Association::UserPolicy { user, policy } => {
                let pair = (self.user_id(user)?, self.policy_id(policy)?);
                Ok((&mut self.user_policies, pair))
            }
            Association::GroupPolicy { group, policy } => {
                let pair = (self.group_id(group)?, self.policy_id(policy)?);
                Ok((&mut self.group_policies, pair))
            }
        }
    }

    fn policy_ids(&self, user_id: u64, source: PolicySource) -> BTreeSet<u64> {
        match source {
            PolicySource::Direct => self
                .user_policies
                .iter()
                .filter(|(u, _)| *u == user_id)
                .map(|(_, p)| *p)
                .collect(),
            PolicySource::ViaGroups => {
                let groups: BTreeSet<u64> = self
                    .user_groups
                    .iter()
                    .filter(|(u, _)| *u == user_id)
                    .map(|(_, g)| *g)
                    .collect();
                self.group_policies
                    .iter()
                    .filter(|(g, _)| groups.contains(g))
                    .map(|(_, p)| *p)
                    .collect()
            }
        }
    }

    /// Set union of every source in the query.
    fn resolve(&self, query: &PolicyQuery) -> Vec<Policy> {
        let Some(user_id) = self.users.id_of(query.username()) else {
            return Vec::new();
        };
        let ids: BTreeSet<u64> = query
            .sources()
            .iter()
            .flat_map(|source| self.policy_ids(user_id, *source))
            .collect();
        ids.iter()
            .filter_map(|id| self.policies.by_id(*id))
            .cloned()
            .collect()
    }
}

/// In-memory entity store.
///
/// Intended for tests/dev. Every mutation runs against a staged copy of the
/// tables that replaces the live copy only if the whole operation succeeds,
/// so a failed cascade leaves no partial state behind.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
    fault: Mutex<Option<CascadeStep>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next cascading delete that reaches `step` fail there.
    ///
    /// One-shot; used to exercise rollback of partially applied deletes.
    pub fn fail_cascade_at(&self, step: CascadeStep) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = Some(step);
        }
    }

    fn checkpoint(&self, step: CascadeStep) -> Result<()> {
        let mut fault = self
            .fault
            .lock()
            .map_err(|_| Error::backend("lock poisoned"))?;
        if fault.take_if(|armed| *armed == step).is_some() {
            return Err(Error::invariant(format!("injected failure at {step:?}")));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R> {
        let tables = self
            .tables
            .read()
            .map_err(|_| Error::backend("lock poisoned"))?;
        Ok(f(&tables))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R>) -> Result<R> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| Error::backend("lock poisoned"))?;
        let mut staged = tables.clone();
        let out = f(&mut staged)?;
        *tables = staged;
        Ok(out)
    }

    fn paginate<T: Entity>(rows: Vec<T>, page: &PageRequest) -> Listing<T> {
        page.paginate(rows)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        self.write(|t| {
            if t.users.id_of(&user.username).is_some() {
                return Err(Error::conflict(EntityKind::User, &user.username));
            }
            let id = t.allocate_id();
            let user = user.into_user(Utc::now());
            t.users.insert(id, user.username.clone(), user.clone());
            Ok(user)
        })
    }

    async fn get_user(&self, username: &Username) -> Result<Option<User>> {
        self.read(|t| t.users.get(username).cloned())
    }

    async fn delete_user(&self, username: &Username) -> Result<()> {
        self.write(|t| {
            let id = t.user_id(username)?;

            self.checkpoint(CascadeStep::ClearMemberships)?;
            t.user_groups.retain(|(u, _)| *u != id);

            self.checkpoint(CascadeStep::ClearGrants)?;
            t.user_policies.retain(|(u, _)| *u != id);

            self.checkpoint(CascadeStep::ClearCredentials)?;
            let owned: Vec<AccessKeyId> = t
                .credentials
                .values()
                .filter(|c| c.user_id == id)
                .map(|c| c.credential.access_key_id.clone())
                .collect();
            for key in &owned {
                t.credentials.remove(key);
            }

            self.checkpoint(CascadeStep::DeleteRow)?;
            t.users.remove(username);

            debug!(%username, credentials = owned.len(), "user deleted");
            Ok(())
        })
    }

    async fn list_users(&self, page: &PageRequest) -> Result<Listing<User>> {
        let rows = self.read(|t| t.users.values().cloned().collect())?;
        Ok(Self::paginate(rows, page))
    }

    async fn create_group(&self, name: &GroupName) -> Result<Group> {
        self.write(|t| {
            if t.groups.id_of(name).is_some() {
                return Err(Error::conflict(EntityKind::Group, name));
            }
            let id = t.allocate_id();
            let group = Group {
                name: name.clone(),
                creation_date: Utc::now(),
            };
            t.groups.insert(id, name.clone(), group.clone());
            Ok(group)
        })
    }

    async fn get_group(&self, name: &GroupName) -> Result<Option<Group>> {
        self.read(|t| t.groups.get(name).cloned())
    }

    async fn delete_group(&self, name: &GroupName) -> Result<()> {
        self.write(|t| {
            let id = t.group_id(name)?;

            self.checkpoint(CascadeStep::ClearMemberships)?;
            t.user_groups.retain(|(_, g)| *g != id);

            self.checkpoint(CascadeStep::ClearGrants)?;
            t.group_policies.retain(|(g, _)| *g != id);

            self.checkpoint(CascadeStep::DeleteRow)?;
            t.groups.remove(name);

            debug!(group = %name, "group deleted");
            Ok(())
        })
    }

    async fn list_groups(&self, page: &PageRequest) -> Result<Listing<Group>> {
        let rows = self.read(|t| t.groups.values().cloned().collect())?;
        Ok(Self::paginate(rows, page))
    }

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        self.write(|t| {
            if t.policies.id_of(&policy.name).is_some() {
                return Err(Error::conflict(EntityKind::Policy, &policy.name));
            }
            let id = t.allocate_id();
            let policy = policy.into_policy(Utc::now());
            t.policies.insert(id, policy.name.clone(), policy.clone());
            Ok(policy)
        })
    }

    async fn get_policy(&self, name: &PolicyName) -> Result<Option<Policy>> {
        self.read(|t| t.policies.get(name).cloned())
    }

    async fn update_policy(&self, name: &PolicyName, document: PolicyDocument) -> Result<Policy> {
        self.write(|t| {
            let id = t.policy_id(name)?;
            let policy = t
                .policies
                .rows
                .get_mut(&id)
                .ok_or_else(|| Error::not_found(EntityKind::Policy, name))?;
            policy.document = document;
            Ok(policy.clone())
        })
    }

    async fn delete_policy(&self, name: &PolicyName) -> Result<()> {
        self.write(|t| {
            let id = t.policy_id(name)?;

            self.checkpoint(CascadeStep::ClearGrants)?;
            t.user_policies.retain(|(_, p)| *p != id);
            t.group_policies.retain(|(_, p)| *p != id);

            self.checkpoint(CascadeStep::DeleteRow)?;
            t.policies.remove(name);

            debug!(policy = %name, "policy deleted");
            Ok(())
        })
    }

    async fn list_policies(&self, page: &PageRequest) -> Result<Listing<Policy>> {
        let rows = self.read(|t| t.policies.values().cloned().collect())?;
        Ok(Self::paginate(rows, page))
    }

    async fn add_association(&self, association: Association) -> Result<()> {
        self.write(|t| {
            let (set, pair) = t.link(&association)?;
            set.insert(pair);
            Ok(())
        })
    }

    async fn remove_association(&self, association: Association) -> Result<()> {
        self.write(|t| {
            let (set, pair) = t.link(&association)?;
            set.remove(&pair);
            Ok(())
        })
    }

    async fn list_group_members(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<User>> {
        let rows = self.read(|t| {
            let Some(group_id) = t.groups.id_of(group) else {
                return Vec::new();
            };
            t.user_groups
                .iter()
                .filter(|(_, g)| *g == group_id)
                .filter_map(|(u, _)| t.users.by_id(*u))
                .cloned()
                .collect()
        })?;
        Ok(Self::paginate(rows, page))
    }

    async fn list_user_groups(&self, username: &Username, page: &PageRequest) -> Result<Listing<Group>> {
        let rows = self.read(|t| {
            let Some(user_id) = t.users.id_of(username) else {
                return Vec::new();
            };
            t.user_groups
                .iter()
                .filter(|(u, _)| *u == user_id)
                .filter_map(|(_, g)| t.groups.by_id(*g))
                .cloned()
                .collect()
        })?;
        Ok(Self::paginate(rows, page))
    }

    async fn list_group_policies(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<Policy>> {
        let rows = self.read(|t| {
            let Some(group_id) = t.groups.id_of(group) else {
                return Vec::new();
            };
            t.group_policies
                .iter()
                .filter(|(g, _)| *g == group_id)
                .filter_map(|(_, p)| t.policies.by_id(*p))
                .cloned()
                .collect()
        })?;
        Ok(Self::paginate(rows, page))
    }

    async fn list_user_policies(
        &self,
        username: &Username,
        scope: PolicyScope,
        page: &PageRequest,
    ) -> Result<Listing<Policy>> {
        let query = PolicyQuery::new(username.clone(), scope);
        let rows = self.read(|t| t.resolve(&query))?;
        Ok(Self::paginate(rows, page))
    }

    async fn create_credential(
        &self,
        username: &Username,
        access_key_id: AccessKeyId,
        secret_access_key: SecretAccessKey,
    ) -> Result<Credential> {
        self.write(|t| {
            let user_id = t.user_id(username)?;
            if t.credentials.id_of(&access_key_id).is_some() {
                return Err(Error::conflict(EntityKind::Credential, &access_key_id));
            }
            let id = t.allocate_id();
            let credential = Credential {
                access_key_id: access_key_id.clone(),
                secret_access_key,
                creation_date: Utc::now(),
                username: username.clone(),
            };
            t.credentials.insert(
                id,
                access_key_id,
                OwnedCredential {
                    user_id,
                    credential: credential.clone(),
                },
            );
            Ok(credential)
        })
    }

    async fn get_credential(&self, access_key_id: &AccessKeyId) -> Result<Option<Credential>> {
        self.read(|t| t.credentials.get(access_key_id).map(|c| c.credential.clone()))
    }

    async fn get_user_credential(
        &self,
        username: &Username,
        access_key_id: &AccessKeyId,
    ) -> Result<Option<Credential>> {
        self.read(|t| {
            t.credentials
                .get(access_key_id)
                .filter(|c| &c.credential.username == username)
                .map(|c| c.credential.clone())
        })
    }

    async fn delete_credential(&self, username: &Username, access_key_id: &AccessKeyId) -> Result<()> {
        self.write(|t| {
            let user_id = t.user_id(username)?;
            match t.credentials.get(access_key_id) {
                Some(c) if c.user_id == user_id => {
                    t.credentials.remove(access_key_id);
                    Ok(())
                }
                _ => Err(Error::not_found(EntityKind::Credential, access_key_id)),
            }
        })
    }

    async fn list_user_credentials(&self, username: &Username, page: &PageRequest) -> Result<Listing<Credential>> {
        let rows = self.read(|t| {
            let Some(user_id) = t.users.id_of(username) else {
                return Vec::new();
            };
            t.credentials
                .values()
                .filter(|c| c.user_id == user_id)
                .map(|c| c.credential.clone())
                .collect()
        })?;
        Ok(Self::paginate(rows, page))
    }
}
