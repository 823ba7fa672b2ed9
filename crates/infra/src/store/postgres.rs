//! Postgres-backed entity store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to [`sluice_core::Error`] as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | Error | Scenario |
//! |------------|----------------------|-------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Natural key already taken |
//! | Database (foreign key violation) | `23503` | `NotFound` | Association endpoint deleted concurrently |
//! | Database (serialization failure / deadlock) | `40001`, `40P01` | `Transient` | Concurrent transaction conflict |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Transient` | Connectivity |
//! | Other | N/A | `Backend` | Decoding, protocol errors, etc. |
//!
//! A failure while a cascading delete is clearing rows is reported as
//! `InvariantViolation`; the transaction is dropped and rolled back.
//!
//! ## Listings
//!
//! Every listing wraps a row source exposing the natural key as `sort_key`
//! and applies the same prefix/cursor predicates to a `COUNT(*)` and to the
//! ordered, limited fetch. Both run inside one `REPEATABLE READ, READ ONLY`
//! transaction so they observe the same snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{error, field, instrument, Span};

use sluice_core::{
    AccessKeyId, Credential, Entity, EntityKind, Error, Group, GroupName, NewPolicy, NewUser,
    Page, PageRequest, Policy, PolicyDocument, PolicyName, Result, SecretAccessKey, User,
    Username,
};

use super::r#trait::{Association, EntityStore, Listing};
use crate::resolver::{PolicyQuery, PolicyScope, PolicySource};

const SCHEMA: &str = include_str!("../../migrations/0001_entities.sql");

const USER_COLUMNS: &str =
    "u.username AS sort_key, u.username, u.email, u.external_id, u.friendly_name, u.source, u.creation_date";
const GROUP_COLUMNS: &str = "g.name AS sort_key, g.name, g.creation_date";
const POLICY_COLUMNS: &str = "p.id, p.name AS sort_key, p.name, p.document, p.creation_date";
const CREDENTIAL_COLUMNS: &str =
    "c.access_key_id AS sort_key, c.access_key_id, c.secret_access_key, c.creation_date, u.username";

/// Postgres-backed entity store.
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
/// Multi-statement mutations run in a transaction; dropping the future of an
/// in-flight operation drops its transaction, which rolls it back.
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip_all, err)]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn list<R, T>(&self, operation: &'static str, source: Source<'_>, page: &PageRequest) -> Result<Listing<T>>
    where
        R: for<'r> FromRow<'r, PgRow>,
        T: Entity + TryFrom<R, Error = Error>,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM (");
        source.push(&mut count);
        count.push(") AS src");
        push_keyset_filter(&mut count, page);

        let total: i64 = count
            .build()
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .try_get("total")
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut fetch = QueryBuilder::<Postgres>::new("SELECT * FROM (");
        source.push(&mut fetch);
        fetch.push(") AS src");
        push_keyset_filter(&mut fetch, page);
        fetch.push(r#" ORDER BY src.sort_key COLLATE "C" ASC"#);
        if let Some(amount) = page.amount {
            fetch.push(" LIMIT ");
            fetch.push_bind(i64::from(amount));
        }

        let rows = fetch
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let decoded = R::from_row(row).map_err(|e| map_sqlx_error(operation, e))?;
            items.push(T::try_from(decoded)?);
        }

        let meta = Page::from_window(page, total.max(0) as u64, &items);
        let span = Span::current();
        span.record("total", total);
        span.record("results", meta.results);
        Ok((items, meta))
    }

    async fn delete_cascade(
        &self,
        operation: &'static str,
        kind: EntityKind,
        key: &str,
        statements: &[&'static str],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let Some(id) = lock_id(&mut tx, kind, key).await? else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(Error::not_found(kind, key));
        };

        let mut cleared = 0;
        for statement in statements {
            let done = sqlx::query(*statement)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| cascade_failure(operation, statement, e))?;
            cleared += done.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| cascade_failure(operation, "COMMIT", e))?;

        Span::current().record("rows_cleared", cleared);
        Ok(())
    }

    async fn link(&self, operation: &'static str, association: &Association, insert: bool) -> Result<()> {
        let (table, (owner_col, owner_kind, owner), (target_col, target_kind, target)) = link_target(association);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let owner_id = require_id(&mut tx, owner_kind, owner).await?;
        let target_id = require_id(&mut tx, target_kind, target).await?;

        let sql = if insert {
            format!("INSERT INTO {table} ({owner_col}, {target_col}) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        } else {
            format!("DELETE FROM {table} WHERE {owner_col} = $1 AND {target_col} = $2")
        };
        sqlx::query(&sql)
            .bind(owner_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

/// Row source of a listing. Each variant selects its columns plus `sort_key`.
enum Source<'a> {
    Users,
    Groups,
    Policies,
    GroupMembers(&'a GroupName),
    UserGroups(&'a Username),
    GroupPolicies(&'a GroupName),
    UserCredentials(&'a Username),
    UserPolicies(&'a PolicyQuery),
}

impl Source<'_> {
    fn push(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Source::Users => {
                qb.push(format!("SELECT {USER_COLUMNS} FROM sluice_users u"));
            }
            Source::Groups => {
                qb.push(format!("SELECT {GROUP_COLUMNS} FROM sluice_groups g"));
            }
            Source::Policies => {
                qb.push(format!("SELECT {POLICY_COLUMNS} FROM sluice_policies p"));
            }
            Source::GroupMembers(group) => {
                qb.push(format!(
                    "SELECT {USER_COLUMNS} FROM sluice_users u \
                     JOIN sluice_user_groups ug ON ug.user_id = u.id \
                     JOIN sluice_groups g ON g.id = ug.group_id \
                     WHERE g.name = "
                ));
                qb.push_bind(group.as_str().to_owned());
            }
            Source::UserGroups(username) => {
                qb.push(format!(
                    "SELECT {GROUP_COLUMNS} FROM sluice_groups g \
                     JOIN sluice_user_groups ug ON ug.group_id = g.id \
                     JOIN sluice_users u ON u.id = ug.user_id \
                     WHERE u.username = "
                ));
                qb.push_bind(username.as_str().to_owned());
            }
            Source::GroupPolicies(group) => {
                qb.push(format!(
                    "SELECT {POLICY_COLUMNS} FROM sluice_policies p \
                     JOIN sluice_group_policies gp ON gp.policy_id = p.id \
                     JOIN sluice_groups g ON g.id = gp.group_id \
                     WHERE g.name = "
                ));
                qb.push_bind(group.as_str().to_owned());
            }
            Source::UserCredentials(username) => {
                qb.push(format!(
                    "SELECT {CREDENTIAL_COLUMNS} FROM sluice_credentials c \
                     JOIN sluice_users u ON u.id = c.user_id \
                     WHERE u.username = "
                ));
                qb.push_bind(username.as_str().to_owned());
            }
            Source::UserPolicies(query) => {
                // UNION, not UNION ALL: a policy reachable both directly and
                // through a group must be counted and returned once.
                for (idx, source) in query.sources().iter().enumerate() {
                    if idx > 0 {
                        qb.push(" UNION ");
                    }
                    qb.push(policy_source_sql(*source));
                    qb.push_bind(query.username().as_str().to_owned());
                }
            }
        }
    }
}

fn policy_source_sql(source: PolicySource) -> String {
    match source {
        PolicySource::Direct => format!(
            "SELECT {POLICY_COLUMNS} FROM sluice_policies p \
             JOIN sluice_user_policies up ON up.policy_id = p.id \
             JOIN sluice_users u ON u.id = up.user_id \
             WHERE u.username = "
        ),
        PolicySource::ViaGroups => format!(
            "SELECT {POLICY_COLUMNS} FROM sluice_policies p \
             JOIN sluice_group_policies gp ON gp.policy_id = p.id \
             JOIN sluice_user_groups ug ON ug.group_id = gp.group_id \
             JOIN sluice_users u ON u.id = ug.user_id \
             WHERE u.username = "
        ),
    }
}

/// Append the prefix and cursor predicates shared by count and fetch.
fn push_keyset_filter(qb: &mut QueryBuilder<'_, Postgres>, page: &PageRequest) {
    qb.push(" WHERE TRUE");
    if let Some(prefix) = page.prefix() {
        qb.push(" AND src.sort_key LIKE ");
        qb.push_bind(format!("{}%", escape_like(prefix)));
        qb.push(r" ESCAPE '\'");
    }
    if let Some(after) = page.after() {
        qb.push(r#" AND src.sort_key COLLATE "C" > "#);
        qb.push_bind(after.to_owned());
    }
}

/// Escape `LIKE` metacharacters so the prefix matches literally.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

type LinkEnd<'a> = (&'static str, EntityKind, &'a str);

fn link_target(association: &Association) -> (&'static str, LinkEnd<'_>, LinkEnd<'_>) {
    match association {
        Association::UserGroup { user, group } => (
            "sluice_user_groups",
            ("user_id", EntityKind::User, user.as_str()),
            ("group_id", EntityKind::Group, group.as_str()),
        ),
        Association::UserPolicy { user, policy } => (
            "sluice_user_policies",
            ("user_id", EntityKind::User, user.as_str()),
            ("policy_id", EntityKind::Policy, policy.as_str()),
        ),
        Association::GroupPolicy { group, policy } => (
            "sluice_group_policies",
            ("group_id", EntityKind::Group, group.as_str()),
            ("policy_id", EntityKind::Policy, policy.as_str()),
        ),
    }
}

fn id_lookup_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "SELECT id FROM sluice_users WHERE username = $1",
        EntityKind::Group => "SELECT id FROM sluice_groups WHERE name = $1",
        EntityKind::Policy => "SELECT id FROM sluice_policies WHERE name = $1",
        EntityKind::Credential => "SELECT id FROM sluice_credentials WHERE access_key_id = $1",
    }
}

/// Surrogate id of an entity that must exist.
async fn require_id(tx: &mut Transaction<'_, Postgres>, kind: EntityKind, key: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(id_lookup_sql(kind))
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lookup_id", e))?
        .ok_or_else(|| Error::not_found(kind, key))
}

/// Surrogate id of an entity about to be deleted, row-locked.
async fn lock_id(tx: &mut Transaction<'_, Postgres>, kind: EntityKind, key: &str) -> Result<Option<i64>> {
    let sql = format!("{} FOR UPDATE", id_lookup_sql(kind));
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_id", e))
}

fn cascade_failure(operation: &str, statement: &str, err: sqlx::Error) -> Error {
    let cause = map_sqlx_error(operation, err);
    error!(operation, statement, %cause, "cascade delete failed, rolled back");
    Error::invariant(format!("{operation} rolled back: {cause}"))
}

/// Map SQLx errors to the domain error taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => Error::Conflict(msg),
                Some("23503") => Error::NotFound(msg),
                Some("40001") | Some("40P01") => Error::Transient(msg),
                _ => Error::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => Error::transient(format!("connection pool timed out in {operation}")),
        sqlx::Error::PoolClosed => Error::transient(format!("connection pool closed in {operation}")),
        sqlx::Error::Io(e) => Error::transient(format!("i/o error in {operation}: {e}")),
        other => Error::backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn corrupt(kind: EntityKind, err: Error) -> Error {
    Error::backend(format!("stored {kind} row is invalid: {err}"))
}

// SQLx row types

#[derive(Debug)]
struct UserRow {
    username: String,
    email: Option<String>,
    external_id: Option<String>,
    friendly_name: Option<String>,
    source: Option<String>,
    creation_date: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(UserRow {
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            external_id: row.try_get("external_id")?,
            friendly_name: row.try_get("friendly_name")?,
            source: row.try_get("source")?,
            creation_date: row.try_get("creation_date")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            username: Username::new(row.username).map_err(|e| corrupt(EntityKind::User, e))?,
            email: row.email,
            external_id: row.external_id,
            friendly_name: row.friendly_name,
            source: row.source,
            creation_date: row.creation_date,
        })
    }
}

#[derive(Debug)]
struct GroupRow {
    name: String,
    creation_date: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for GroupRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(GroupRow {
            name: row.try_get("name")?,
            creation_date: row.try_get("creation_date")?,
        })
    }
}

impl TryFrom<GroupRow> for Group {
    type Error = Error;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(Group {
            name: GroupName::new(row.name).map_err(|e| corrupt(EntityKind::Group, e))?,
            creation_date: row.creation_date,
        })
    }
}

#[derive(Debug)]
struct PolicyRow {
    name: String,
    document: serde_json::Value,
    creation_date: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PolicyRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(PolicyRow {
            name: row.try_get("name")?,
            document: row.try_get("document")?,
            creation_date: row.try_get("creation_date")?,
        })
    }
}

impl TryFrom<PolicyRow> for Policy {
    type Error = Error;

    fn try_from(row: PolicyRow) -> Result<Self> {
        Ok(Policy {
            name: PolicyName::new(row.name).map_err(|e| corrupt(EntityKind::Policy, e))?,
            document: PolicyDocument::from_value(row.document)?,
            creation_date: row.creation_date,
        })
    }
}

#[derive(Debug)]
struct CredentialRow {
    access_key_id: String,
    secret_access_key: String,
    creation_date: DateTime<Utc>,
    username: String,
}

impl<'r> FromRow<'r, PgRow> for CredentialRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(CredentialRow {
            access_key_id: row.try_get("access_key_id")?,
            secret_access_key: row.try_get("secret_access_key")?,
            creation_date: row.try_get("creation_date")?,
            username: row.try_get("username")?,
        })
    }
}

impl TryFrom<CredentialRow> for Credential {
    type Error = Error;

    fn try_from(row: CredentialRow) -> Result<Self> {
        Ok(Credential {
            access_key_id: AccessKeyId::new(row.access_key_id)
                .map_err(|e| corrupt(EntityKind::Credential, e))?,
            secret_access_key: SecretAccessKey::new(row.secret_access_key),
            creation_date: row.creation_date,
            username: Username::new(row.username).map_err(|e| corrupt(EntityKind::Credential, e))?,
        })
    }
}

fn decode<R, T>(operation: &str, row: &PgRow) -> Result<T>
where
    R: for<'r> FromRow<'r, PgRow>,
    T: TryFrom<R, Error = Error>,
{
    let decoded = R::from_row(row).map_err(|e| map_sqlx_error(operation, e))?;
    T::try_from(decoded)
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip_all, fields(username = %user.username), err)]
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let user = user.into_user(Utc::now());
        let row = sqlx::query(
            r#"
            INSERT INTO sluice_users (username, email, external_id, friendly_name, source, creation_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING username, email, external_id, friendly_name, source, creation_date
            "#,
        )
        .bind(user.username.as_str())
        .bind(&user.email)
        .bind(&user.external_id)
        .bind(&user.friendly_name)
        .bind(&user.source)
        .bind(user.creation_date)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(EntityKind::User, &user.username)
            } else {
                map_sqlx_error("create_user", e)
            }
        })?;

        decode::<UserRow, User>("create_user", &row)
    }

    #[instrument(skip_all, fields(username = %username), err)]
    async fn get_user(&self, username: &Username) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT username, email, external_id, friendly_name, source, creation_date
            FROM sluice_users
            WHERE username = $1
            "#,
        )
        .bind(username.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;

        row.map(|r| decode::<UserRow, User>("get_user", &r)).transpose()
    }

    #[instrument(skip_all, fields(username = %username, rows_cleared = field::Empty), err)]
    async fn delete_user(&self, username: &Username) -> Result<()> {
        self.delete_cascade(
            "delete_user",
            EntityKind::User,
            username.as_str(),
            &[
                "DELETE FROM sluice_user_groups WHERE user_id = $1",
                "DELETE FROM sluice_user_policies WHERE user_id = $1",
                "DELETE FROM sluice_credentials WHERE user_id = $1",
                "DELETE FROM sluice_users WHERE id = $1",
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(total = field::Empty, results = field::Empty), err)]
    async fn list_users(&self, page: &PageRequest) -> Result<Listing<User>> {
        self.list::<UserRow, User>("list_users", Source::Users, page).await
    }

    #[instrument(skip_all, fields(group = %name), err)]
    async fn create_group(&self, name: &GroupName) -> Result<Group> {
        let row = sqlx::query(
            r#"
            INSERT INTO sluice_groups (name, creation_date)
            VALUES ($1, $2)
            RETURNING name, creation_date
            "#,
        )
        .bind(name.as_str())
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(EntityKind::Group, name)
            } else {
                map_sqlx_error("create_group", e)
            }
        })?;

        decode::<GroupRow, Group>("create_group", &row)
    }

    #[instrument(skip_all, fields(group = %name), err)]
    async fn get_group(&self, name: &GroupName) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT name, creation_date FROM sluice_groups WHERE name = $1")
            .bind(name.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_group", e))?;

        row.map(|r| decode::<GroupRow, Group>("get_group", &r)).transpose()
    }

    #[instrument(skip_all, fields(group = %name, rows_cleared = field::Empty), err)]
    async fn delete_group(&self, name: &GroupName) -> Result<()> {
        self.delete_cascade(
            "delete_group",
            EntityKind::Group,
            name.as_str(),
            &[
                "DELETE FROM sluice_user_groups WHERE group_id = $1",
                "DELETE FROM sluice_group_policies WHERE group_id = $1",
                "DELETE FROM sluice_groups WHERE id = $1",
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(total = field::Empty, results = field::Empty), err)]
    async fn list_groups(&self, page: &PageRequest) -> Result<Listing<Group>> {
        self.list::<GroupRow, Group>("list_groups", Source::Groups, page).await
    }

    #[instrument(skip_all, fields(policy = %policy.name), err)]
    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        let policy = policy.into_policy(Utc::now());
        let row = sqlx::query(
            r#"
            INSERT INTO sluice_policies (name, document, creation_date)
            VALUES ($1, $2, $3)
            RETURNING name, document, creation_date
            "#,
        )
        .bind(policy.name.as_str())
        .bind(policy.document.to_value()?)
        .bind(policy.creation_date)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(EntityKind::Policy, &policy.name)
            } else {
                map_sqlx_error("create_policy", e)
            }
        })?;

        decode::<PolicyRow, Policy>("create_policy", &row)
    }

    #[instrument(skip_all, fields(policy = %name), err)]
    async fn get_policy(&self, name: &PolicyName) -> Result<Option<Policy>> {
        let row = sqlx::query("SELECT name, document, creation_date FROM sluice_policies WHERE name = $1")
            .bind(name.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_policy", e))?;

        row.map(|r| decode::<PolicyRow, Policy>("get_policy", &r)).transpose()
    }

    #[instrument(skip_all, fields(policy = %name), err)]
    async fn update_policy(&self, name: &PolicyName, document: PolicyDocument) -> Result<Policy> {
        let row = sqlx::query(
            r#"
            UPDATE sluice_policies SET document = $2
            WHERE name = $1
            RETURNING name, document, creation_date
            "#,
        )
        .bind(name.as_str())
        .bind(document.to_value()?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_policy", e))?
        .ok_or_else(|| Error::not_found(EntityKind::Policy, name))?;

        decode::<PolicyRow, Policy>("update_policy", &row)
    }

    #[instrument(skip_all, fields(policy = %name, rows_cleared = field::Empty), err)]
    async fn delete_policy(&self, name: &PolicyName) -> Result<()> {
        self.delete_cascade(
            "delete_policy",
            EntityKind::Policy,
            name.as_str(),
            &[
                "DELETE FROM sluice_user_policies WHERE policy_id = $1",
                "DELETE FROM sluice_group_policies WHERE policy_id = $1",
                "DELETE FROM sluice_policies WHERE id = $1",
            ],
        )
        .await
    }

    #[instrument(skip_all, fields(total = field::Empty, results = field::Empty), err)]
    async fn list_policies(&self, page: &PageRequest) -> Result<Listing<Policy>> {
        self.list::<PolicyRow, Policy>("list_policies", Source::Policies, page).await
    }

    #[instrument(skip_all, fields(association = association.label()), err)]
    async fn add_association(&self, association: Association) -> Result<()> {
        self.link("add_association", &association, true).await
    }

    #[instrument(skip_all, fields(association = association.label()), err)]
    async fn remove_association(&self, association: Association) -> Result<()> {
        self.link("remove_association", &association, false).await
    }

    #[instrument(skip_all, fields(group = %group, total = field::Empty, results = field::Empty), err)]
    async fn list_group_members(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<User>> {
        self.list::<UserRow, User>("list_group_members", Source::GroupMembers(group), page)
            .await
    }

    #[instrument(skip_all, fields(username = %username, total = field::Empty, results = field::Empty), err)]
    async fn list_user_groups(&self, username: &Username, page: &PageRequest) -> Result<Listing<Group>> {
        self.list::<GroupRow, Group>("list_user_groups", Source::UserGroups(username), page)
            .await
    }

    #[instrument(skip_all, fields(group = %group, total = field::Empty, results = field::Empty), err)]
    async fn list_group_policies(&self, group: &GroupName, page: &PageRequest) -> Result<Listing<Policy>> {
        self.list::<PolicyRow, Policy>("list_group_policies", Source::GroupPolicies(group), page)
            .await
    }

    #[instrument(skip_all, fields(username = %username, scope = ?scope, total = field::Empty, results = field::Empty), err)]
    async fn list_user_policies(
        &self,
        username: &Username,
        scope: PolicyScope,
        page: &PageRequest,
    ) -> Result<Listing<Policy>> {
        let query = PolicyQuery::new(username.clone(), scope);
        self.list::<PolicyRow, Policy>("list_user_policies", Source::UserPolicies(&query), page)
            .await
    }

    #[instrument(skip_all, fields(username = %username, access_key_id = %access_key_id), err)]
    async fn create_credential(
        &self,
        username: &Username,
        access_key_id: AccessKeyId,
        secret_access_key: SecretAccessKey,
    ) -> Result<Credential> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_credential", e))?;
        let user_id = require_id(&mut tx, EntityKind::User, username.as_str()).await?;

        let creation_date: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO sluice_credentials (access_key_id, secret_access_key, user_id, creation_date)
            VALUES ($1, $2, $3, $4)
            RETURNING creation_date
            "#,
        )
        .bind(access_key_id.as_str())
        .bind(secret_access_key.expose())
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(EntityKind::Credential, &access_key_id)
            } else {
                map_sqlx_error("create_credential", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_credential", e))?;

        Ok(Credential {
            access_key_id,
            secret_access_key,
            creation_date,
            username: username.clone(),
        })
    }

    #[instrument(skip_all, fields(access_key_id = %access_key_id), err)]
    async fn get_credential(&self, access_key_id: &AccessKeyId) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r#"
            SELECT c.access_key_id, c.secret_access_key, c.creation_date, u.username
            FROM sluice_credentials c
            JOIN sluice_users u ON u.id = c.user_id
            WHERE c.access_key_id = $1
            "#,
        )
        .bind(access_key_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_credential", e))?;

        row.map(|r| decode::<CredentialRow, Credential>("get_credential", &r))
            .transpose()
    }

    #[instrument(skip_all, fields(username = %username, access_key_id = %access_key_id), err)]
    async fn get_user_credential(
        &self,
        username: &Username,
        access_key_id: &AccessKeyId,
    ) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r#"
            SELECT c.access_key_id, c.secret_access_key, c.creation_date, u.username
            FROM sluice_credentials c
            JOIN sluice_users u ON u.id = c.user_id
            WHERE c.access_key_id = $1 AND u.username = $2
            "#,
        )
        .bind(access_key_id.as_str())
        .bind(username.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user_credential", e))?;

        row.map(|r| decode::<CredentialRow, Credential>("get_user_credential", &r))
            .transpose()
    }

    #[instrument(skip_all, fields(username = %username, access_key_id = %access_key_id), err)]
    async fn delete_credential(&self, username: &Username, access_key_id: &AccessKeyId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("delete_credential", e))?;
        let user_id = require_id(&mut tx, EntityKind::User, username.as_str()).await?;

        let done = sqlx::query("DELETE FROM sluice_credentials WHERE access_key_id = $1 AND user_id = $2")
            .bind(access_key_id.as_str())
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_credential", e))?;

        if done.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(Error::not_found(EntityKind::Credential, access_key_id));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_credential", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(username = %username, total = field::Empty, results = field::Empty), err)]
    async fn list_user_credentials(&self, username: &Username, page: &PageRequest) -> Result<Listing<Credential>> {
        self.list::<CredentialRow, Credential>("list_user_credentials", Source::UserCredentials(username), page)
            .await
    }
}
