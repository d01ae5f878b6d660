use crate::error::{AppError, AppResult};
use sqlx::SqlitePool;

pub const ACCOUNTS_TABLE: &str = "accounts";
pub const GROUPS_TABLE: &str = "access_groups";
pub const PERMISSIONS_TABLE: &str = "access_permissions";
pub const ACCOUNT_GROUPS_TABLE: &str = "account_group_links";
pub const ACCOUNT_PERMISSIONS_TABLE: &str = "account_permission_links";

/// Initialize the account store schema for SQLite
///
/// Creates accounts, groups, permissions and the two link tables. Usernames
/// are unique; emails are not, collisions on email are reported by the
/// validator instead.
pub async fn init_schema(pool: &SqlitePool) -> AppResult<()> {
    let statements = [
        (
            "accounts",
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    password TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_staff INTEGER NOT NULL DEFAULT 0,
                    attributes TEXT NOT NULL DEFAULT '{{}}',
                    date_joined DATETIME NOT NULL
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
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
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
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
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
                    account_id INTEGER NOT NULL,
                    group_id INTEGER NOT NULL,
                    PRIMARY KEY (account_id, group_id),
                    FOREIGN KEY (account_id) REFERENCES {} (id) ON DELETE CASCADE,
                    FOREIGN KEY (group_id) REFERENCES {} (id) ON DELETE CASCADE
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
                    account_id INTEGER NOT NULL,
                    permission_id INTEGER NOT NULL,
                    PRIMARY KEY (account_id, permission_id),
                    FOREIGN KEY (account_id) REFERENCES {} (id) ON DELETE CASCADE,
                    FOREIGN KEY (permission_id) REFERENCES {} (id) ON DELETE CASCADE
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

/// Drop the schema (for cleanup/testing)
#[cfg(test)]
pub async fn drop_schema(pool: &SqlitePool) -> AppResult<()> {
    // Link tables first due to foreign key constraints
    for table in [
        ACCOUNT_PERMISSIONS_TABLE,
        ACCOUNT_GROUPS_TABLE,
        PERMISSIONS_TABLE,
        GROUPS_TABLE,
        ACCOUNTS_TABLE,
    ] {
        let sql = format!("DROP TABLE IF EXISTS {}", table);
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to drop table {}: {}", table, e)))?;
    }

    Ok(())
}
