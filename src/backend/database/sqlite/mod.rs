//! SQLite implementation of the account store

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Duration;

use super::account_insert::PreparedAccount;
use super::config::DatabaseBackendConfig;
use crate::backend::{Backend, NameMap, StoreTransaction, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{Account, GrantNames, Identity};

pub mod queries;
pub mod schema;

use schema::{GROUPS_TABLE, PERMISSIONS_TABLE};

/// SQLite-backed account store
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn acquire(&self) -> AppResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(format!("Failed to acquire connection: {}", e)))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| AppError::Configuration(format!("Invalid backend config: {}", e)))?;

        let mut options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout));
        if config.is_memory_database() {
            // An in-memory database lives exactly as long as its connection
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(&config.connection_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to SQLite: {}", e)))?;

        Ok(Self::new(pool))
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> AppResult<()> {
        schema::init_schema(&self.pool).await
    }
}

#[async_trait]
impl UserStore for SqliteBackend {
    async fn find_accounts_by_usernames(&self, usernames: &[String]) -> AppResult<Vec<Account>> {
        let mut conn = self.acquire().await?;
        queries::select_accounts_by_usernames(&mut conn, usernames).await
    }

    async fn find_username_collisions(&self, identities: &[Identity]) -> AppResult<Vec<Account>> {
        let mut conn = self.acquire().await?;
        queries::select_username_collisions(&mut conn, identities).await
    }

    async fn find_email_collisions(&self, identities: &[Identity]) -> AppResult<Vec<Account>> {
        let mut conn = self.acquire().await?;
        queries::select_email_collisions(&mut conn, identities).await
    }

    async fn group_names(&self) -> AppResult<NameMap> {
        let mut conn = self.acquire().await?;
        queries::select_group_names(&mut conn).await
    }

    async fn permission_names(&self) -> AppResult<NameMap> {
        let mut conn = self.acquire().await?;
        queries::select_permission_names(&mut conn).await
    }

    async fn account_grants(&self, account_id: i64) -> AppResult<GrantNames> {
        let mut conn = self.acquire().await?;
        queries::select_account_grants(&mut conn, account_id).await
    }

    async fn count_accounts(&self) -> AppResult<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", schema::ACCOUNTS_TABLE))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count accounts: {}", e)))
    }

    async fn ensure_group(&self, name: &str) -> AppResult<i64> {
        let insert_sql = format!(
            "INSERT INTO {} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            GROUPS_TABLE
        );
        sqlx::query(&insert_sql)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create group {}: {}", name, e)))?;

        let select_sql = format!("SELECT id FROM {} WHERE name = ?1", GROUPS_TABLE);
        sqlx::query_scalar(&select_sql)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to find group {}: {}", name, e)))
    }

    async fn ensure_permission(
        &self,
        app_label: &str,
        codename: &str,
        name: &str,
    ) -> AppResult<i64> {
        let insert_sql = format!(
            "INSERT INTO {} (app_label, codename, name) VALUES (?1, ?2, ?3) ON CONFLICT(app_label, codename) DO NOTHING",
            PERMISSIONS_TABLE
        );
        sqlx::query(&insert_sql)
            .bind(app_label)
            .bind(codename)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to create permission {}.{}: {}",
                    app_label, codename, e
                ))
            })?;

        let select_sql = format!(
            "SELECT id FROM {} WHERE app_label = ?1 AND codename = ?2",
            PERMISSIONS_TABLE
        );
        sqlx::query_scalar(&select_sql)
            .bind(app_label)
            .bind(codename)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to find permission {}.{}: {}",
                    app_label, codename, e
                ))
            })
    }

    async fn begin(&self) -> AppResult<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteStoreTransaction { tx }))
    }
}

/// Open SQLite transaction; rolled back on drop unless committed
pub struct SqliteStoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteStoreTransaction {
    async fn find_accounts_by_usernames(
        &mut self,
        usernames: &[String],
    ) -> AppResult<Vec<Account>> {
        queries::select_accounts_by_usernames(&mut self.tx, usernames).await
    }

    async fn group_names(&mut self) -> AppResult<NameMap> {
        queries::select_group_names(&mut self.tx).await
    }

    async fn permission_names(&mut self) -> AppResult<NameMap> {
        queries::select_permission_names(&mut self.tx).await
    }

    async fn insert_accounts(&mut self, accounts: &[PreparedAccount]) -> AppResult<u64> {
        queries::insert_accounts(&mut self.tx, accounts).await
    }

    async fn set_account_groups(&mut self, account_id: i64, group_ids: &[i64]) -> AppResult<()> {
        queries::replace_account_groups(&mut self.tx, account_id, group_ids).await
    }

    async fn set_account_permissions(
        &mut self,
        account_id: i64,
        permission_ids: &[i64],
    ) -> AppResult<()> {
        queries::replace_account_permissions(&mut self.tx, account_id, permission_ids).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let SqliteStoreTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let SqliteStoreTransaction { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| AppError::Database(format!("Failed to roll back transaction: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::database::account_insert::AccountInsertProcessor;
    use crate::models::{UploadColumns, UploadRow};
    use chrono::Utc;

    async fn create_store() -> SqliteBackend {
        let backend = SqliteBackend::connect(&DatabaseBackendConfig::memory_sqlite())
            .await
            .unwrap();
        backend.init_schema().await.unwrap();
        backend
    }

    fn prepared(username: &str, email: &str) -> PreparedAccount {
        let row = UploadRow::from_pairs(0, [("username", username), ("email", email)]);
        AccountInsertProcessor::prepare_account(&row, &UploadColumns::default(), Utc::now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookup_by_username() {
        let store = create_store().await;

        let mut tx = store.begin().await.unwrap();
        let inserted = tx
            .insert_accounts(&[prepared("alice", "alice@example.com"), prepared("bob", "bob@example.com")])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(inserted, 2);

        let found = store
            .find_accounts_by_usernames(&["bob".to_string(), "carol".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "bob");
        assert!(found[0].id.is_some());
    }

    #[tokio::test]
    async fn test_rolled_back_insert_leaves_nothing() {
        let store = create_store().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_accounts(&[prepared("alice", "alice@example.com")])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.count_accounts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let store = create_store().await;

        let mut tx = store.begin().await.unwrap();
        let result = tx
            .insert_accounts(&[prepared("alice", "a@example.com"), prepared("alice", "b@example.com")])
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_collision_lookups() {
        let store = create_store().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_accounts(&[prepared("alice", "alice@example.com")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let same = Identity {
            username: "alice".to_string(),
            email: "ALICE@example.com".to_string(),
        };
        let other_email = Identity {
            username: "alice".to_string(),
            email: "someone@example.com".to_string(),
        };
        let other_username = Identity {
            username: "alicia".to_string(),
            email: "Alice@Example.com".to_string(),
        };

        assert!(store.find_username_collisions(&[same.clone()]).await.unwrap().is_empty());
        assert_eq!(
            store.find_username_collisions(&[other_email]).await.unwrap().len(),
            1
        );
        assert!(store.find_email_collisions(&[same]).await.unwrap().is_empty());
        assert_eq!(
            store.find_email_collisions(&[other_username]).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_ensure_group_and_permission_are_idempotent() {
        let store = create_store().await;

        let first = store.ensure_group("staff").await.unwrap();
        let second = store.ensure_group("staff").await.unwrap();
        assert_eq!(first, second);

        let perm = store
            .ensure_permission("users", "add_user", "Can add user")
            .await
            .unwrap();
        let names = store.permission_names().await.unwrap();
        assert_eq!(names.get("users.add_user"), Some(&perm));
        assert_eq!(store.group_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grants_are_replaced() {
        let store = create_store().await;
        let staff = store.ensure_group("staff").await.unwrap();
        let editors = store.ensure_group("editors").await.unwrap();
        let add_user = store
            .ensure_permission("users", "add_user", "Can add user")
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_accounts(&[prepared("alice", "alice@example.com")])
            .await
            .unwrap();
        let account = tx
            .find_accounts_by_usernames(&["alice".to_string()])
            .await
            .unwrap()
            .remove(0);
        let id = account.id.unwrap();
        tx.set_account_groups(id, &[staff]).await.unwrap();
        tx.set_account_groups(id, &[editors]).await.unwrap();
        tx.set_account_permissions(id, &[add_user]).await.unwrap();
        tx.commit().await.unwrap();

        let grants = store.account_grants(id).await.unwrap();
        assert_eq!(grants.groups, vec!["editors"]);
        assert_eq!(grants.permissions, vec!["users.add_user"]);
    }
}
