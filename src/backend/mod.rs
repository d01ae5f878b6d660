use crate::backend::database::account_insert::PreparedAccount;
use crate::backend::database::DatabaseBackendConfig;
use crate::error::AppResult;
use crate::models::{Account, GrantNames, Identity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod database;

/// Name to store-native id lookup for groups or permissions
pub type NameMap = HashMap<String, i64>;

/// Supported database backend types
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

/// Core backend abstraction
#[async_trait]
pub trait Backend: Send + Sync {
    /// Connect and initialize the storage backend
    async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self>
    where
        Self: Sized;

    /// Check if the storage backend is healthy and accessible
    async fn health_check(&self) -> AppResult<()>;

    /// Create tables and indexes if they do not exist yet
    async fn init_schema(&self) -> AppResult<()>;
}

/// The account, group and permission store the upload pipeline provisions into
///
/// Reads run against the pool and see a snapshot as of the call; writes only
/// happen through a [`StoreTransaction`] obtained from [`UserStore::begin`].
#[async_trait]
pub trait UserStore: Backend {
    /// Accounts whose username is in `usernames`, fetched in one query
    async fn find_accounts_by_usernames(&self, usernames: &[String]) -> AppResult<Vec<Account>>;

    /// Accounts holding one of the usernames under a different (case-insensitive) email
    async fn find_username_collisions(&self, identities: &[Identity]) -> AppResult<Vec<Account>>;

    /// Accounts holding one of the emails (case-insensitive) under a different username
    async fn find_email_collisions(&self, identities: &[Identity]) -> AppResult<Vec<Account>>;

    async fn group_names(&self) -> AppResult<NameMap>;

    /// Permissions keyed as `app_label.codename`
    async fn permission_names(&self) -> AppResult<NameMap>;

    /// Names of the groups and permissions attached to an account
    async fn account_grants(&self, account_id: i64) -> AppResult<GrantNames>;

    async fn count_accounts(&self) -> AppResult<i64>;

    /// Create the group if missing and return its id
    async fn ensure_group(&self, name: &str) -> AppResult<i64>;

    /// Create the permission if missing and return its id
    async fn ensure_permission(&self, app_label: &str, codename: &str, name: &str)
        -> AppResult<i64>;

    /// Open the unit of work all account writes go through
    async fn begin(&self) -> AppResult<Box<dyn StoreTransaction>>;
}

/// One open store transaction
///
/// Dropping it without calling [`StoreTransaction::commit`] rolls back every write.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_accounts_by_usernames(
        &mut self,
        usernames: &[String],
    ) -> AppResult<Vec<Account>>;

    async fn group_names(&mut self) -> AppResult<NameMap>;

    async fn permission_names(&mut self) -> AppResult<NameMap>;

    /// Insert all accounts in one statement; a uniqueness violation fails the whole batch
    async fn insert_accounts(&mut self, accounts: &[PreparedAccount]) -> AppResult<u64>;

    async fn set_account_groups(&mut self, account_id: i64, group_ids: &[i64]) -> AppResult<()>;

    async fn set_account_permissions(
        &mut self,
        account_id: i64,
        permission_ids: &[i64],
    ) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    /// Create a store based on configuration
    pub async fn create(config: &DatabaseBackendConfig) -> AppResult<Arc<dyn UserStore>> {
        let backend = Self::create_backend(config).await?;
        Ok(Arc::from(backend))
    }

    /// Create a store based on configuration (returns Box)
    pub async fn create_backend(config: &DatabaseBackendConfig) -> AppResult<Box<dyn UserStore>> {
        match config.database_type {
            DatabaseType::PostgreSQL => {
                let backend =
                    crate::backend::database::postgres::PostgresBackend::connect(config).await?;
                Ok(Box::new(backend))
            }
            DatabaseType::SQLite => {
                let backend =
                    crate::backend::database::sqlite::SqliteBackend::connect(config).await?;
                Ok(Box::new(backend))
            }
        }
    }
}
