use crate::error::{AppError, AppResult};
use sqlx::PgPool;

pub const ACCOUNTS_TABLE: &str = "accounts";
pub const GROUPS_TABLE: &str = "access_groups";
pub const PERMISSIONS_TABLE: &str = "access_permissions";
pub const ACCOUNT_GROUPS_TABLE: &str = "account_group_links";
pub const ACCOUNT_PERMISSIONS_TABLE: &str = "account_permission_links";

/// Initialize the account store schema for PostgreSQL
pub async fn init_schema(pool: &PgPool) -> AppResult<()> {
    let statements = [
        (
            "accounts",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    password TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    is_staff BOOLEAN NOT NULL DEFAULT FALSE,
                    attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    date_joined TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                ACCOUNTS_TABLE
            ),
        ),
        (
            "groups",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )
                "#,
                GROUPS_TABLE
            ),
        ),
        (
            "permissions",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    app_label TEXT NOT NULL,
                    codename TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    UNIQUE(app_label, codename)
                )
                "#,
                PERMISSIONS_TABLE
            ),
        ),
        (
            "account groups",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    account_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                    group_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                    PRIMARY KEY (account_id, group_id)
                )
                "#,
                ACCOUNT_GROUPS_TABLE, ACCOUNTS_TABLE, GROUPS_TABLE
            ),
        ),
        (
            "account permissions",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    account_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                    permission_id BIGINT NOT NULL REFERENCES {} (id) ON DELETE CASCADE,
                    PRIMARY KEY (account_id, permission_id)
                )
                "#,
                ACCOUNT_PERMISSIONS_TABLE, ACCOUNTS_TABLE, PERMISSIONS_TABLE
            ),
        ),
        (
            "email index",
            format!(
                "CREATE INDEX IF NOT EXISTS idx_accounts_email ON {} (LOWER(email))",
                ACCOUNTS_TABLE
            ),
        ),
    ];

    for (label, sql) in statements.iter() {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create {} table: {}", label, e)))?;
    }

    Ok(())
}
