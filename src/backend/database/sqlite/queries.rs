//! SQL shared by the pool-backed store and its transactions
//!
//! Every function takes a bare connection so the same statement runs either on
//! a pooled connection or inside an open transaction.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::schema::{
    ACCOUNTS_TABLE, ACCOUNT_GROUPS_TABLE, ACCOUNT_PERMISSIONS_TABLE, GROUPS_TABLE,
    PERMISSIONS_TABLE,
};
use crate::backend::database::account_insert::{AccountInsertProcessor, PreparedAccount};
use crate::backend::NameMap;
use crate::error::{map_database_error, AppError, AppResult};
use crate::models::{Account, GrantNames, Identity};

const ACCOUNT_COLUMNS: &str =
    "id, username, email, first_name, last_name, is_active, is_staff, attributes, date_joined";

fn account_from_row(row: &SqliteRow) -> AppResult<Account> {
    let read = |e: sqlx::Error| AppError::Database(format!("Failed to read account row: {}", e));
    let attributes: String = row.try_get("attributes").map_err(read)?;

    Ok(Account {
        id: Some(row.try_get("id").map_err(read)?),
        username: row.try_get("username").map_err(read)?,
        email: row.try_get("email").map_err(read)?,
        first_name: row.try_get("first_name").map_err(read)?,
        last_name: row.try_get("last_name").map_err(read)?,
        is_active: row.try_get("is_active").map_err(read)?,
        is_staff: row.try_get("is_staff").map_err(read)?,
        date_joined: row.try_get("date_joined").map_err(read)?,
        attributes: AccountInsertProcessor::attributes_from_json(&attributes)?,
    })
}

async fn fetch_accounts(
    conn: &mut SqliteConnection,
    mut builder: QueryBuilder<'_, Sqlite>,
) -> AppResult<Vec<Account>> {
    let rows = builder
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch accounts: {}", e)))?;

    rows.iter().map(account_from_row).collect()
}

pub async fn select_accounts_by_usernames(
    conn: &mut SqliteConnection,
    usernames: &[String],
) -> AppResult<Vec<Account>> {
    if usernames.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM {} WHERE username IN (",
        ACCOUNT_COLUMNS, ACCOUNTS_TABLE
    ));
    let mut separated = builder.separated(", ");
    for username in usernames {
        separated.push_bind(username.as_str());
    }
    separated.push_unseparated(") ORDER BY id");

    fetch_accounts(conn, builder).await
}

pub async fn select_username_collisions(
    conn: &mut SqliteConnection,
    identities: &[Identity],
) -> AppResult<Vec<Account>> {
    let candidates: Vec<&Identity> = identities
        .iter()
        .filter(|identity| !identity.username.is_empty())
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM {} WHERE ",
        ACCOUNT_COLUMNS, ACCOUNTS_TABLE
    ));
    for (i, identity) in candidates.into_iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("(username = ");
        builder.push_bind(identity.username.as_str());
        builder.push(" AND LOWER(email) <> LOWER(");
        builder.push_bind(identity.email.as_str());
        builder.push("))");
    }
    builder.push(" ORDER BY id");

    fetch_accounts(conn, builder).await
}

pub async fn select_email_collisions(
    conn: &mut SqliteConnection,
    identities: &[Identity],
) -> AppResult<Vec<Account>> {
    let candidates: Vec<&Identity> = identities
        .iter()
        .filter(|identity| !identity.email.is_empty())
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM {} WHERE ",
        ACCOUNT_COLUMNS, ACCOUNTS_TABLE
    ));
    for (i, identity) in candidates.into_iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("(LOWER(email) = LOWER(");
        builder.push_bind(identity.email.as_str());
        builder.push(") AND username <> ");
        builder.push_bind(identity.username.as_str());
        builder.push(")");
    }
    builder.push(" ORDER BY id");

    fetch_accounts(conn, builder).await
}

async fn select_name_map(conn: &mut SqliteConnection, sql: &str) -> AppResult<NameMap> {
    let rows = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load names: {}", e)))?;

    let read_name = |e: sqlx::Error| AppError::Database(format!("Failed to read name row: {}", e));
    let mut names = NameMap::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id").map_err(read_name)?;
        let name: String = row.try_get("name").map_err(read_name)?;
        names.insert(name, id);
    }
    Ok(names)
}

pub async fn select_group_names(conn: &mut SqliteConnection) -> AppResult<NameMap> {
    select_name_map(conn, &format!("SELECT id, name FROM {}", GROUPS_TABLE)).await
}

pub async fn select_permission_names(conn: &mut SqliteConnection) -> AppResult<NameMap> {
    select_name_map(
        conn,
        &format!(
            "SELECT id, app_label || '.' || codename AS name FROM {}",
            PERMISSIONS_TABLE
        ),
    )
    .await
}

pub async fn select_account_grants(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> AppResult<GrantNames> {
    let groups_sql = format!(
        "SELECT g.name AS name FROM {} g INNER JOIN {} l ON g.id = l.group_id WHERE l.account_id = ?1 ORDER BY g.name",
        GROUPS_TABLE, ACCOUNT_GROUPS_TABLE
    );
    let groups: Vec<String> = sqlx::query_scalar(&groups_sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch account groups: {}", e)))?;

    let permissions_sql = format!(
        "SELECT p.app_label || '.' || p.codename AS name FROM {} p INNER JOIN {} l ON p.id = l.permission_id WHERE l.account_id = ?1 ORDER BY name",
        PERMISSIONS_TABLE, ACCOUNT_PERMISSIONS_TABLE
    );
    let permissions: Vec<String> = sqlx::query_scalar(&permissions_sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to fetch account permissions: {}", e))
        })?;

    Ok(GrantNames {
        groups,
        permissions,
    })
}

pub async fn insert_accounts(
    conn: &mut SqliteConnection,
    accounts: &[PreparedAccount],
) -> AppResult<u64> {
    if accounts.is_empty() {
        return Ok(0);
    }

    // SQLite stores JSON as TEXT
    let attributes = accounts
        .iter()
        .map(|prepared| serde_json::to_string(&prepared.attributes))
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::Serialization)?;

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO {} (username, email, first_name, last_name, password, is_active, is_staff, attributes, date_joined) ",
        ACCOUNTS_TABLE
    ));
    builder.push_values(
        accounts.iter().zip(attributes.iter()),
        |mut values, (prepared, attributes)| {
            let account = &prepared.account;
            values
                .push_bind(account.username.as_str())
                .push_bind(account.email.as_str())
                .push_bind(account.first_name.as_str())
                .push_bind(account.last_name.as_str())
                .push_bind(prepared.password.as_str())
                .push_bind(account.is_active)
                .push_bind(account.is_staff)
                .push_bind(attributes.as_str())
                .push_bind(account.date_joined);
        },
    );

    let result = builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, "Failed to insert accounts"))?;

    Ok(result.rows_affected())
}

async fn replace_links(
    conn: &mut SqliteConnection,
    table: &str,
    target_column: &str,
    account_id: i64,
    target_ids: &[i64],
) -> AppResult<()> {
    let delete_sql = format!("DELETE FROM {} WHERE account_id = ?1", table);
    sqlx::query(&delete_sql)
        .bind(account_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to clear {}: {}", table, e)))?;

    if target_ids.is_empty() {
        return Ok(());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO {} (account_id, {}) ",
        table, target_column
    ));
    builder.push_values(target_ids, |mut values, target_id| {
        values.push_bind(account_id).push_bind(*target_id);
    });
    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to write {}", table)))?;

    Ok(())
}

pub async fn replace_account_groups(
    conn: &mut SqliteConnection,
    account_id: i64,
    group_ids: &[i64],
) -> AppResult<()> {
    replace_links(conn, ACCOUNT_GROUPS_TABLE, "group_id", account_id, group_ids).await
}

pub async fn replace_account_permissions(
    conn: &mut SqliteConnection,
    account_id: i64,
    permission_ids: &[i64],
) -> AppResult<()> {
    replace_links(
        conn,
        ACCOUNT_PERMISSIONS_TABLE,
        "permission_id",
        account_id,
        permission_ids,
    )
    .await
}
