//! PostgreSQL implementation of the account store

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use super::account_insert::PreparedAccount;
use super::config::DatabaseBackendConfig;
use crate::backend::{Backend, NameMap, StoreTransaction, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{Account, GrantNames, Identity};

pub mod queries;
pub mod schema;

use schema::{ACCOUNTS_TABLE, GROUPS_TABLE, PERMISSIONS_TABLE};

/// PostgreSQL-backed account store
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn acquire(&self) -> AppResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(format!("Failed to acquire connection: {}", e)))
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn connect(config: &DatabaseBackendConfig) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| AppError::Configuration(format!("Invalid backend config: {}", e)))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.connection_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

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
impl UserStore for PostgresBackend {
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
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", ACCOUNTS_TABLE))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count accounts: {}", e)))
    }

    async fn ensure_group(&self, name: &str) -> AppResult<i64> {
        // The no-op update makes RETURNING yield the existing row on conflict
        let sql = format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id",
            GROUPS_TABLE
        );
        sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to ensure group {}: {}", name, e)))
    }

    async fn ensure_permission(
        &self,
        app_label: &str,
        codename: &str,
        name: &str,
    ) -> AppResult<i64> {
        let sql = format!(
            "INSERT INTO {} (app_label, codename, name) VALUES ($1, $2, $3) ON CONFLICT (app_label, codename) DO UPDATE SET codename = EXCLUDED.codename RETURNING id",
            PERMISSIONS_TABLE
        );
        sqlx::query_scalar(&sql)
            .bind(app_label)
            .bind(codename)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to ensure permission {}.{}: {}",
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
        Ok(Box::new(PostgresStoreTransaction { tx }))
    }
}

/// Open PostgreSQL transaction; rolled back on drop unless committed
pub struct PostgresStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresStoreTransaction {
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
        let PostgresStoreTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let PostgresStoreTransaction { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| AppError::Database(format!("Failed to roll back transaction: {}", e)))
    }
}
