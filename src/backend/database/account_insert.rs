use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::models::{Account, UploadColumns, UploadRow};

/// Upload columns that map onto dedicated account fields
const FIRST_NAME_COLUMN: &str = "first_name";
const LAST_NAME_COLUMN: &str = "last_name";

/// Account data ready for insertion
#[derive(Debug, Clone)]
pub struct PreparedAccount {
    pub account: Account,
    pub password: String,
    /// `account.attributes` serialized for the JSON column
    pub attributes: Value,
}

/// Shared logic turning upload rows into insertable accounts
pub struct AccountInsertProcessor;

impl AccountInsertProcessor {
    /// Prepare one row for insertion
    ///
    /// - identity columns become username and email
    /// - `first_name` / `last_name` fill the name fields
    /// - grant columns are dropped (they are attached after insert)
    /// - every other column is kept in `attributes`
    /// - the credential is unusable, the account can't log in with a password
    pub fn prepare_account(
        row: &UploadRow,
        columns: &UploadColumns,
        timestamp: DateTime<Utc>,
    ) -> AppResult<PreparedAccount> {
        let mut account = Account::new(row.value(&columns.username), row.value(&columns.email));
        account.first_name = row.value(FIRST_NAME_COLUMN).to_string();
        account.last_name = row.value(LAST_NAME_COLUMN).to_string();
        account.date_joined = timestamp;

        let reserved = [
            columns.username.as_str(),
            columns.email.as_str(),
            columns.groups.as_str(),
            columns.permissions.as_str(),
            FIRST_NAME_COLUMN,
            LAST_NAME_COLUMN,
        ];
        account.attributes = row
            .values()
            .iter()
            .filter(|(column, _)| !reserved.contains(&column.as_str()))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect::<BTreeMap<_, _>>();

        let attributes = serde_json::to_value(&account.attributes).map_err(AppError::Serialization)?;

        Ok(PreparedAccount {
            account,
            password: crate::utils::unusable_password(),
            attributes,
        })
    }

    /// Decode the stored attributes column
    pub fn attributes_from_json(raw: &str) -> AppResult<BTreeMap<String, String>> {
        if raw.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(raw).map_err(AppError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::UNUSABLE_PASSWORD_PREFIX;

    #[test]
    fn test_prepare_account_splits_columns() {
        let row = UploadRow::from_pairs(
            0,
            [
                ("username", "alice"),
                ("email", "alice@example.com"),
                ("first_name", "Alice"),
                ("last_name", "Liddell"),
                ("groups", "staff"),
                ("permissions", "users.add_user"),
                ("department", "Research"),
            ],
        );

        let prepared =
            AccountInsertProcessor::prepare_account(&row, &UploadColumns::default(), Utc::now())
                .unwrap();

        assert_eq!(prepared.account.username, "alice");
        assert_eq!(prepared.account.email, "alice@example.com");
        assert_eq!(prepared.account.first_name, "Alice");
        assert_eq!(prepared.account.last_name, "Liddell");
        assert!(prepared.account.is_active);
        assert!(!prepared.account.is_staff);
        assert_eq!(prepared.account.attributes.len(), 1);
        assert_eq!(prepared.attributes["department"], "Research");
        assert!(prepared.password.starts_with(UNUSABLE_PASSWORD_PREFIX));
    }

    #[test]
    fn test_custom_identity_columns() {
        let columns = UploadColumns {
            username: "login".to_string(),
            email: "mail".to_string(),
            ..UploadColumns::default()
        };
        let row = UploadRow::from_pairs(0, [("login", "bob"), ("mail", "bob@example.com")]);

        let prepared = AccountInsertProcessor::prepare_account(&row, &columns, Utc::now()).unwrap();

        assert_eq!(prepared.account.username, "bob");
        assert_eq!(prepared.account.email, "bob@example.com");
        assert!(prepared.account.attributes.is_empty());
    }

    #[test]
    fn test_attributes_from_json() {
        let attrs = AccountInsertProcessor::attributes_from_json(r#"{"name":"Bob"}"#).unwrap();
        assert_eq!(attrs["name"], "Bob");
        assert!(AccountInsertProcessor::attributes_from_json("").unwrap().is_empty());
    }
}
