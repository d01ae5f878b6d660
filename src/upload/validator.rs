//! Row/Frame Validation Engine
//!
//! Field rules run per cell, row rules per row, frame rules over the whole
//! batch. Issues accumulate; only store failures abort a pass.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::field_rules::{FieldOverrides, FieldValidatorRegistry};
use crate::backend::UserStore;
use crate::config::EmailCollisionPolicy;
use crate::error::AppResult;
use crate::models::{Identity, Severity, UploadColumns, UploadRow, ValidationIssues};

/// Check applied to each row on its own
#[async_trait]
pub trait RowRule: Send + Sync {
    async fn check(&self, row: &UploadRow, issues: &mut ValidationIssues) -> AppResult<()>;
}

/// Check applied to the whole batch at once
#[async_trait]
pub trait FrameRule: Send + Sync {
    async fn check(&self, rows: &[UploadRow], issues: &mut ValidationIssues) -> AppResult<()>;
}

/// Reports blank cells in columns every account needs
pub struct RequiredValuesRule {
    columns: Vec<String>,
}

impl RequiredValuesRule {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }
}

#[async_trait]
impl RowRule for RequiredValuesRule {
    async fn check(&self, row: &UploadRow, issues: &mut ValidationIssues) -> AppResult<()> {
        for column in &self.columns {
            if row.value(column).is_empty() {
                issues.error(row.index(), format!("{} is required", column));
            }
        }
        Ok(())
    }
}

/// Flags every row sharing a value with another row of the batch
pub struct DuplicatesRule {
    /// `(column, compare case-insensitively)`
    columns: Vec<(String, bool)>,
}

impl DuplicatesRule {
    pub fn new(columns: Vec<(String, bool)>) -> Self {
        Self { columns }
    }
}

#[async_trait]
impl FrameRule for DuplicatesRule {
    async fn check(&self, rows: &[UploadRow], issues: &mut ValidationIssues) -> AppResult<()> {
        for (column, case_insensitive) in &self.columns {
            let key = |row: &UploadRow| {
                let value = row.value(column);
                if *case_insensitive {
                    value.to_lowercase()
                } else {
                    value.to_string()
                }
            };

            let mut counts: HashMap<String, usize> = HashMap::new();
            for row in rows.iter().filter(|row| !row.value(column).is_empty()) {
                *counts.entry(key(row)).or_default() += 1;
            }

            for row in rows {
                let value = row.value(column);
                if value.is_empty() {
                    continue;
                }
                if counts.get(&key(row)).copied().unwrap_or(0) > 1 {
                    issues.error(
                        row.index(),
                        format!("row contains duplicate {}='{}'", column, value),
                    );
                }
            }
        }
        Ok(())
    }
}

fn identities(rows: &[UploadRow], columns: &UploadColumns) -> Vec<Identity> {
    rows.iter()
        .map(|row| Identity::from_row(row, columns))
        .collect()
}

/// Errors on rows whose username already belongs to an account with another email
pub struct UsernameCollisionRule {
    store: Arc<dyn UserStore>,
    columns: UploadColumns,
}

impl UsernameCollisionRule {
    pub fn new(store: Arc<dyn UserStore>, columns: UploadColumns) -> Self {
        Self { store, columns }
    }
}

#[async_trait]
impl FrameRule for UsernameCollisionRule {
    async fn check(&self, rows: &[UploadRow], issues: &mut ValidationIssues) -> AppResult<()> {
        let existing = self
            .store
            .find_username_collisions(&identities(rows, &self.columns))
            .await?;
        let taken: HashSet<&str> = existing
            .iter()
            .map(|account| account.username.as_str())
            .collect();

        for row in rows {
            let username = row.value(&self.columns.username);
            if taken.contains(username) {
                issues.error(
                    row.index(),
                    format!(
                        "row contains username='{}', but that user already exists with another email address",
                        username
                    ),
                );
            }
        }
        Ok(())
    }
}

/// Reports rows whose email already belongs to an account under another username
pub struct EmailCollisionRule {
    store: Arc<dyn UserStore>,
    columns: UploadColumns,
    severity: Severity,
}

impl EmailCollisionRule {
    pub fn new(store: Arc<dyn UserStore>, columns: UploadColumns, severity: Severity) -> Self {
        Self {
            store,
            columns,
            severity,
        }
    }
}

#[async_trait]
impl FrameRule for EmailCollisionRule {
    async fn check(&self, rows: &[UploadRow], issues: &mut ValidationIssues) -> AppResult<()> {
        let existing = self
            .store
            .find_email_collisions(&identities(rows, &self.columns))
            .await?;

        let mut holders: HashMap<String, Vec<&str>> = HashMap::new();
        for account in &existing {
            holders
                .entry(account.email.to_lowercase())
                .or_default()
                .push(account.username.as_str());
        }

        for row in rows {
            let email = row.value(&self.columns.email);
            let username = row.value(&self.columns.username);
            let collides = holders
                .get(&email.to_lowercase())
                .map(|owners| owners.iter().any(|owner| *owner != username))
                .unwrap_or(false);

            if collides {
                issues.push(
                    self.severity,
                    row.index(),
                    format!(
                        "row contains email='{}', but that email address already belongs to another username",
                        email
                    ),
                );
            }
        }
        Ok(())
    }
}

/// Runs field, row and frame rules over a batch, in that order
pub struct UsersValidator {
    registry: FieldValidatorRegistry,
    row_rules: Vec<Box<dyn RowRule>>,
    frame_rules: Vec<Box<dyn FrameRule>>,
}

impl UsersValidator {
    pub fn new(registry: FieldValidatorRegistry) -> Self {
        Self {
            registry,
            row_rules: Vec::new(),
            frame_rules: Vec::new(),
        }
    }

    pub fn with_row_rule(mut self, rule: impl RowRule + 'static) -> Self {
        self.row_rules.push(Box::new(rule));
        self
    }

    pub fn with_frame_rule(mut self, rule: impl FrameRule + 'static) -> Self {
        self.frame_rules.push(Box::new(rule));
        self
    }

    /// The default validator: base field rules plus overrides, required
    /// identity values, duplicates, username collisions and (unless switched
    /// off) email collisions
    pub fn standard(
        store: Arc<dyn UserStore>,
        columns: &UploadColumns,
        overrides: &FieldOverrides,
        email_collision: EmailCollisionPolicy,
    ) -> Self {
        let registry = FieldValidatorRegistry::build(store.clone(), columns, overrides);

        let identity_columns: Vec<String> = [&columns.username, &columns.email]
            .into_iter()
            .filter(|column| registry.contains(column))
            .cloned()
            .collect();

        let mut validator = Self::new(registry)
            .with_row_rule(RequiredValuesRule::new(identity_columns))
            .with_frame_rule(DuplicatesRule::new(vec![
                (columns.email.clone(), true),
                (columns.username.clone(), false),
            ]))
            .with_frame_rule(UsernameCollisionRule::new(store.clone(), columns.clone()));

        if let Some(severity) = email_collision.severity() {
            validator =
                validator.with_frame_rule(EmailCollisionRule::new(store, columns.clone(), severity));
        }

        validator
    }

    pub fn registry(&self) -> &FieldValidatorRegistry {
        &self.registry
    }

    /// Validate `rows`, returning errors and warnings keyed by row index
    pub async fn validate(&self, rows: &[UploadRow]) -> AppResult<ValidationIssues> {
        let mut issues = ValidationIssues::new();

        for row in rows {
            for message in self.registry.check_row(row).await? {
                issues.error(row.index(), message);
            }
        }

        for rule in &self.row_rules {
            for row in rows {
                rule.check(row, &mut issues).await?;
            }
        }

        for rule in &self.frame_rules {
            rule.check(rows, &mut issues).await?;
        }

        tracing::debug!(
            rows = rows.len(),
            rows_with_errors = issues.errors().len(),
            rows_with_warnings = issues.warnings().len(),
            "Validated upload batch"
        );

        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, username: &str, email: &str) -> UploadRow {
        UploadRow::from_pairs(index, [("username", username), ("email", email)])
    }

    #[tokio::test]
    async fn test_required_values() {
        let rule = RequiredValuesRule::new(vec!["username".to_string(), "email".to_string()]);
        let mut issues = ValidationIssues::new();

        rule.check(&row(0, "", "a@b.io"), &mut issues).await.unwrap();
        rule.check(&row(1, "bob", "b@b.io"), &mut issues).await.unwrap();

        assert_eq!(issues.errors_for(0), &["username is required".to_string()]);
        assert!(issues.errors_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_flag_every_sharing_row() {
        let rule = DuplicatesRule::new(vec![
            ("email".to_string(), true),
            ("username".to_string(), false),
        ]);
        let rows = vec![
            row(0, "alice", "Shared@x.io"),
            row(1, "bob", "shared@x.io"),
            row(2, "alice", "c@x.io"),
            row(3, "dave", "d@x.io"),
            row(4, "Dave", ""),
            row(5, "erin", ""),
        ];
        let mut issues = ValidationIssues::new();

        rule.check(&rows, &mut issues).await.unwrap();

        assert_eq!(
            issues.errors_for(0),
            &[
                "row contains duplicate email='Shared@x.io'".to_string(),
                "row contains duplicate username='alice'".to_string(),
            ]
        );
        assert_eq!(
            issues.errors_for(1),
            &["row contains duplicate email='shared@x.io'".to_string()]
        );
        assert_eq!(
            issues.errors_for(2),
            &["row contains duplicate username='alice'".to_string()]
        );
        assert!(issues.errors_for(3).is_empty());
        assert!(issues.errors_for(4).is_empty());
        assert!(issues.errors_for(5).is_empty());
    }

    #[tokio::test]
    async fn test_unique_batch_has_no_duplicates() {
        let rule = DuplicatesRule::new(vec![
            ("email".to_string(), true),
            ("username".to_string(), false),
        ]);
        let rows = vec![row(0, "alice", "a@x.io"), row(1, "bob", "b@x.io")];
        let mut issues = ValidationIssues::new();

        rule.check(&rows, &mut issues).await.unwrap();
        assert!(!issues.has_errors());
    }
}
