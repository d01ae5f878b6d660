//! User Creation Engine
//!
//! Creates the accounts of a validated batch inside one store transaction.
//! Any failure rolls back every insert and grant of the batch.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::database::account_insert::{AccountInsertProcessor, PreparedAccount};
use crate::backend::{NameMap, StoreTransaction, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{AccessGrant, Account, CreationResult, UploadColumns, UploadRow};
use crate::utils::split_name_list;

/// Normalisation applied to each row before it is created
pub trait RowPreProcessor: Send + Sync {
    fn process(&self, row: &UploadRow, columns: &UploadColumns) -> UploadRow;
}

/// Lower-cases the email column
pub struct LowercaseEmail;

impl RowPreProcessor for LowercaseEmail {
    fn process(&self, row: &UploadRow, columns: &UploadColumns) -> UploadRow {
        row.with_value(&columns.email, row.value(&columns.email).to_lowercase())
    }
}

/// Creates accounts for validated rows
#[async_trait]
pub trait AccountCreator: Send + Sync {
    async fn create(&self, rows: &[UploadRow]) -> AppResult<CreationResult>;
}

pub struct UsersCreator {
    store: Arc<dyn UserStore>,
    columns: UploadColumns,
    preprocessor: Box<dyn RowPreProcessor>,
}

impl UsersCreator {
    pub fn new(store: Arc<dyn UserStore>, columns: UploadColumns) -> Self {
        Self {
            store,
            columns,
            preprocessor: Box::new(LowercaseEmail),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: impl RowPreProcessor + 'static) -> Self {
        self.preprocessor = Box::new(preprocessor);
        self
    }

    fn resolve_names(
        &self,
        row: &UploadRow,
        column: &str,
        names: &NameMap,
        kind: &str,
    ) -> AppResult<Vec<i64>> {
        let mut ids = Vec::new();
        let mut unknown = Vec::new();

        for name in split_name_list(row.value(column)) {
            match names.get(&name) {
                Some(id) if !ids.contains(id) => ids.push(*id),
                Some(_) => {}
                None => unknown.push(name),
            }
        }

        if !unknown.is_empty() {
            return Err(AppError::Creation(format!(
                "Unknown {} for username '{}': {}",
                kind,
                row.value(&self.columns.username),
                unknown.join(",")
            )));
        }
        Ok(ids)
    }

    /// Every step after pre-processing; the caller owns commit and rollback
    async fn create_within(
        &self,
        tx: &mut dyn StoreTransaction,
        rows: &[UploadRow],
    ) -> AppResult<CreationResult> {
        let groups = tx.group_names().await?;
        let permissions = tx.permission_names().await?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in rows {
            grants.push(AccessGrant {
                group_ids: self.resolve_names(row, &self.columns.groups, &groups, "groups")?,
                permission_ids: self.resolve_names(
                    row,
                    &self.columns.permissions,
                    &permissions,
                    "permissions",
                )?,
            });
        }

        let usernames: Vec<String> = rows
            .iter()
            .map(|row| row.value(&self.columns.username).to_string())
            .collect();
        let existing: HashMap<String, Account> = tx
            .find_accounts_by_usernames(&usernames)
            .await?
            .into_iter()
            .map(|account| (account.username.clone(), account))
            .collect();

        let mut skipped = Vec::new();
        let mut to_create: Vec<(&UploadRow, &AccessGrant)> = Vec::new();
        for (row, grant) in rows.iter().zip(grants.iter()) {
            match existing.get(row.value(&self.columns.username)) {
                Some(account) => skipped.push(account.clone()),
                None => to_create.push((row, grant)),
            }
        }

        if to_create.is_empty() {
            return Ok(CreationResult {
                created: Vec::new(),
                skipped,
            });
        }

        let timestamp = Utc::now();
        let prepared = to_create
            .iter()
            .map(|(row, _)| AccountInsertProcessor::prepare_account(row, &self.columns, timestamp))
            .collect::<AppResult<Vec<PreparedAccount>>>()?;
        tx.insert_accounts(&prepared).await?;

        let created_usernames: Vec<String> = prepared
            .iter()
            .map(|prepared| prepared.account.username.clone())
            .collect();
        let mut inserted: HashMap<String, Account> = tx
            .find_accounts_by_usernames(&created_usernames)
            .await?
            .into_iter()
            .map(|account| (account.username.clone(), account))
            .collect();

        let mut created = Vec::with_capacity(to_create.len());
        for (username, (_, grant)) in created_usernames.iter().zip(to_create.iter()) {
            let account = inserted.remove(username).ok_or_else(|| {
                AppError::Creation(format!("Inserted account '{}' could not be read back", username))
            })?;
            let account_id = account.id.ok_or_else(|| {
                AppError::Creation(format!("Inserted account '{}' has no id", username))
            })?;

            if !grant.group_ids.is_empty() {
                tx.set_account_groups(account_id, &grant.group_ids).await?;
            }
            if !grant.permission_ids.is_empty() {
                tx.set_account_permissions(account_id, &grant.permission_ids)
                    .await?;
            }
            created.push(account);
        }

        Ok(CreationResult { created, skipped })
    }
}

#[async_trait]
impl AccountCreator for UsersCreator {
    /// Create every row not already present, all or nothing
    async fn create(&self, rows: &[UploadRow]) -> AppResult<CreationResult> {
        let rows: Vec<UploadRow> = rows
            .iter()
            .map(|row| self.preprocessor.process(row, &self.columns))
            .collect();

        let mut tx = self.store.begin().await?;
        match self.create_within(tx.as_mut(), &rows).await {
            Ok(result) => {
                tx.commit().await?;
                tracing::info!(
                    created = result.created.len(),
                    skipped = result.skipped.len(),
                    "Created accounts from upload"
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(error = %rollback_error, "Failed to roll back account creation");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_email() {
        let columns = UploadColumns::default();
        let row = UploadRow::from_pairs(0, [("username", "Alice"), ("email", "Alice@Example.COM")]);

        let processed = LowercaseEmail.process(&row, &columns);

        assert_eq!(processed.value("email"), "alice@example.com");
        assert_eq!(processed.value("username"), "Alice");
        assert_eq!(row.value("email"), "Alice@Example.COM");
    }
}
