//! Credential and permission lookups
//!
//! The authentication core only needs two queries from the account database:
//! find an account by login, and list the permissions a user holds through
//! their roles. [`PgAccountStore`] answers both from PostgreSQL;
//! [`InMemoryAccountStore`] serves tests and single-node development.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use usergate_core::{DatabaseConfig, SeedAccount};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for CredentialError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Account as seen by the authentication core
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_account_by_login(
        &self,
        login: &str,
    ) -> Result<Option<AccountRecord>, CredentialError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn permissions_for_user(&self, user_id: Uuid)
        -> Result<BTreeSet<String>, CredentialError>;
}

/// PostgreSQL account store
///
/// Expects `users(id, login, password_hash)`, `roles(id, name)`,
/// `user_roles(user_id, role_id)`, `permissions(id, name)` and
/// `role_permissions(role_id, permission_id)`.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, CredentialError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .connect(&config.postgres_url)
            .await?;
        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgAccountStore {
    async fn find_account_by_login(
        &self,
        login: &str,
    ) -> Result<Option<AccountRecord>, CredentialError> {
        let record = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT u.id, u.login, u.password_hash,
                   COALESCE(array_agg(r.name::text) FILTER (WHERE r.name IS NOT NULL), '{}') AS roles
            FROM users u
            LEFT JOIN user_roles ur ON ur.user_id = u.id
            LEFT JOIN roles r ON r.id = ur.role_id
            WHERE u.login = $1
            GROUP BY u.id, u.login, u.password_hash
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl PermissionStore for PgAccountStore {
    async fn permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<BTreeSet<String>, CredentialError> {
        let permissions = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.name::text
            FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
struct StoredAccount {
    record: AccountRecord,
    permissions: BTreeSet<String>,
}

/// Account store held in process memory
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, StoredAccount>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account and return its generated id
    pub async fn insert_account(
        &self,
        login: &str,
        password_hash: &str,
        roles: &[&str],
        permissions: &[&str],
    ) -> Uuid {
        let id = Uuid::new_v4();
        let account = StoredAccount {
            record: AccountRecord {
                id,
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        };
        self.accounts
            .write()
            .await
            .insert(login.to_string(), account);
        id
    }

    pub async fn from_seed(seed: &[SeedAccount]) -> Self {
        let store = Self::new();
        for account in seed {
            let roles: Vec<&str> = account.roles.iter().map(String::as_str).collect();
            let permissions: Vec<&str> = account.permissions.iter().map(String::as_str).collect();
            store
                .insert_account(&account.login, &account.password_hash, &roles, &permissions)
                .await;
        }
        store
    }
}

#[async_trait]
impl CredentialStore for InMemoryAccountStore {
    async fn find_account_by_login(
        &self,
        login: &str,
    ) -> Result<Option<AccountRecord>, CredentialError> {
        Ok(self
            .accounts
            .read()
            .await
            .get(login)
            .map(|a| a.record.clone()))
    }
}

#[async_trait]
impl PermissionStore for InMemoryAccountStore {
    async fn permissions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<BTreeSet<String>, CredentialError> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.record.id == user_id)
            .map(|a| a.permissions.clone())
            .unwrap_or_default())
    }
}
