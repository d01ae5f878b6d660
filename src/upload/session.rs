//! Upload Session Orchestrator
//!
//! Sequences one submission: parse and guard the table, validate, then (when
//! allowed) create inside one transaction and notify after it commits. Engine
//! results are turned into an [`UploadReport`] for the caller.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::creator::{AccountCreator, UsersCreator};
use super::field_rules::FieldOverrides;
use super::notify::{
    default_recipient_name, EmailTemplate, MailTransport, NotificationRequest, Notifier,
    RecipientNameFn, DEFAULT_FROM_ADDRESS,
};
use super::table::{UploadTable, MAX_UPLOAD_ROWS};
use super::validator::UsersValidator;
use crate::backend::UserStore;
use crate::config::{AppConfig, EmailCollisionPolicy};
use crate::error::{AppError, AppResult};
use crate::models::{Account, UploadColumns, UploadRow, ValidationIssues, ROW_NUMBER_OFFSET};
use crate::utils::format_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Validate-only run, nothing created
    Validated,
    /// Errors present, nothing created
    Rejected,
    Created,
    /// Accounts committed but at least one email failed
    CreatedNotificationFailed,
    /// The creation transaction failed and was rolled back
    Failed,
}

/// A row carrying errors or warnings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRow {
    /// Line in the uploaded file, counting the header
    pub row: usize,
    pub issues: String,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedAccount {
    pub id: Option<i64>,
    pub username: String,
    pub email: String,
    pub date_joined: String,
}

impl From<&Account> for CreatedAccount {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            date_joined: format_timestamp(account.date_joined),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub outcome: UploadOutcome,
    pub success_count: usize,
    pub messages: Vec<String>,
    pub errors: Vec<IssueRow>,
    pub warnings: Vec<IssueRow>,
    pub created: Vec<CreatedAccount>,
    pub skipped: Vec<CreatedAccount>,
}

impl UploadReport {
    fn new(outcome: UploadOutcome) -> Self {
        Self {
            outcome,
            success_count: 0,
            messages: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            created: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOptions {
    pub validate_only: bool,
    pub send_emails: bool,
    /// Absolute URL put in the new-account email
    pub login_url: String,
}

/// Headers an upload must and may carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFormat {
    pub required_headers: Vec<String>,
    pub optional_headers: Vec<String>,
    pub max_rows: usize,
}

/// Builds the validator used for one submission
pub type ValidatorFactory = Arc<dyn Fn(Arc<dyn UserStore>) -> UsersValidator + Send + Sync>;

pub struct UploadSession {
    store: Arc<dyn UserStore>,
    columns: UploadColumns,
    overrides: FieldOverrides,
    email_collision: EmailCollisionPolicy,
    validator_factory: Option<ValidatorFactory>,
    creator: Option<Arc<dyn AccountCreator>>,
    notifier: Notifier,
    template: EmailTemplate,
    subject: String,
    from_address: String,
    recipient_name: RecipientNameFn,
}

impl UploadSession {
    pub fn new(store: Arc<dyn UserStore>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            store,
            columns: UploadColumns::default(),
            overrides: FieldOverrides::new(),
            email_collision: EmailCollisionPolicy::default(),
            validator_factory: None,
            creator: None,
            notifier: Notifier::new(transport),
            template: EmailTemplate::default(),
            subject: "Account Created".to_string(),
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            recipient_name: Arc::new(default_recipient_name),
        }
    }

    /// Session wired from the `upload` and `email` config sections
    pub fn from_config(
        store: Arc<dyn UserStore>,
        transport: Arc<dyn MailTransport>,
        config: &AppConfig,
    ) -> AppResult<Self> {
        Ok(Self::new(store, transport)
            .with_columns(config.upload.columns())
            .with_overrides(FieldOverrides::from_config(&config.upload.field_rules)?)
            .with_email_collision(config.upload.email_collision)
            .with_template(EmailTemplate::load(config.email.template_path.as_deref())?)
            .with_subject(config.email.subject.clone())
            .with_from_address(config.sender_address().to_string()))
    }

    pub fn with_columns(mut self, columns: UploadColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_overrides(mut self, overrides: FieldOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_email_collision(mut self, policy: EmailCollisionPolicy) -> Self {
        self.email_collision = policy;
        self
    }

    /// Replace [`UsersValidator::standard`]; columns, overrides and the
    /// email-collision policy are then up to the factory
    pub fn with_validator(mut self, factory: ValidatorFactory) -> Self {
        self.validator_factory = Some(factory);
        self
    }

    /// Replace the default [`UsersCreator`]
    pub fn with_creator(mut self, creator: Arc<dyn AccountCreator>) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_template(mut self, template: EmailTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_from_address(mut self, from_address: String) -> Self {
        self.from_address = from_address;
        self
    }

    pub fn with_recipient_name(mut self, recipient_name: RecipientNameFn) -> Self {
        self.recipient_name = recipient_name;
        self
    }

    pub fn columns(&self) -> &UploadColumns {
        &self.columns
    }

    /// A fresh validator, so name maps are read once per submission
    pub fn validator(&self) -> UsersValidator {
        match &self.validator_factory {
            Some(factory) => factory(self.store.clone()),
            None => UsersValidator::standard(
                self.store.clone(),
                &self.columns,
                &self.overrides,
                self.email_collision,
            ),
        }
    }

    pub fn format(&self) -> UploadFormat {
        let validator = self.validator();
        UploadFormat {
            required_headers: validator.registry().required_columns(),
            optional_headers: validator.registry().optional_columns(),
            max_rows: MAX_UPLOAD_ROWS,
        }
    }

    /// Process one uploaded CSV
    ///
    /// Row-cap and header violations are returned as `InputShape` errors;
    /// everything after that ends up in the report.
    pub async fn submit(&self, content: &[u8], options: &SubmitOptions) -> AppResult<UploadReport> {
        let table = UploadTable::from_csv(content)?;
        let validator = self.validator();
        table.ensure_headers(&validator.registry().required_columns())?;

        let issues = validator.validate(table.rows()).await?;
        let report_columns = validator.registry().columns();
        tracing::info!(
            rows = table.len(),
            rows_with_errors = issues.errors().len(),
            rows_with_warnings = issues.warnings().len(),
            validate_only = options.validate_only,
            "Upload validated"
        );

        let outcome = if options.validate_only {
            UploadOutcome::Validated
        } else if issues.has_errors() {
            UploadOutcome::Rejected
        } else {
            return self
                .create(table.into_rows(), &issues, &report_columns, options)
                .await;
        };

        let mut report = UploadReport::new(outcome);
        report.errors = issue_rows(table.rows(), issues.errors(), &report_columns);
        report.warnings = issue_rows(table.rows(), issues.warnings(), &report_columns);
        if issues.has_errors() {
            report.messages.push("Some rows contained validation errors.".to_string());
        } else if !issues.has_warnings() {
            report.messages.push("Uploaded CSV passed all checks.".to_string());
        }
        if outcome == UploadOutcome::Validated {
            report.success_count = table
                .rows()
                .iter()
                .filter(|row| issues.is_eligible(row.index()))
                .count();
        }
        Ok(report)
    }

    async fn create(
        &self,
        rows: Vec<UploadRow>,
        issues: &ValidationIssues,
        report_columns: &[String],
        options: &SubmitOptions,
    ) -> AppResult<UploadReport> {
        let warnings = issue_rows(&rows, issues.warnings(), report_columns);

        let result = match &self.creator {
            Some(creator) => creator.create(&rows).await,
            None => {
                UsersCreator::new(self.store.clone(), self.columns.clone())
                    .create(&rows)
                    .await
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, rows = rows.len(), "Account creation failed");
                let mut report = UploadReport::new(UploadOutcome::Failed);
                report.warnings = warnings;
                report
                    .messages
                    .push(format!("Something went wrong while creating users: {}", e));
                return Ok(report);
            }
        };

        let mut report = UploadReport::new(UploadOutcome::Created);
        report.warnings = warnings;
        report.success_count = result.created.len();
        report.created = result.created.iter().map(CreatedAccount::from).collect();
        report.skipped = result.skipped.iter().map(CreatedAccount::from).collect();

        if options.send_emails && !result.created.is_empty() {
            let request = NotificationRequest {
                template: &self.template,
                login_url: &options.login_url,
                from_address: &self.from_address,
                subject: &self.subject,
                recipient_name: &self.recipient_name,
            };
            if let Err(e) = self.notifier.send(&request, &result.created).await {
                tracing::warn!(error = %e, created = result.created.len(), "Account emails failed");
                report.outcome = UploadOutcome::CreatedNotificationFailed;
                report.messages.push(format!(
                    "{} New users created, but some account emails may not have been sent: {}",
                    result.created.len(),
                    notification_cause(&e)
                ));
                return Ok(report);
            }
        }

        report
            .messages
            .push(format!("{} New users created.", result.created.len()));
        Ok(report)
    }
}

fn notification_cause(error: &AppError) -> String {
    match error {
        AppError::Notification(cause) => cause.clone(),
        other => other.to_string(),
    }
}

fn issue_rows(
    rows: &[UploadRow],
    issues: &BTreeMap<usize, Vec<String>>,
    columns: &[String],
) -> Vec<IssueRow> {
    issues
        .iter()
        .map(|(index, messages)| {
            let values = rows
                .get(*index)
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| (column.clone(), row.value(column).to_string()))
                        .collect()
                })
                .unwrap_or_default();
            IssueRow {
                row: index + ROW_NUMBER_OFFSET,
                issues: messages.join("; "),
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_rows_use_file_line_numbers() {
        let rows = vec![
            UploadRow::from_pairs(0, [("username", "alice"), ("email", "a@x.io")]),
            UploadRow::from_pairs(1, [("username", "b"), ("email", "bad")]),
        ];
        let mut issues = ValidationIssues::new();
        issues.error(1, "first");
        issues.error(1, "second");

        let columns = vec!["email".to_string(), "username".to_string()];
        let table = issue_rows(&rows, issues.errors(), &columns);

        assert_eq!(table.len(), 1);
        assert_eq!(table[0].row, 3);
        assert_eq!(table[0].issues, "first; second");
        assert_eq!(table[0].values.get("username").map(String::as_str), Some("b"));
        assert_eq!(table[0].values.get("email").map(String::as_str), Some("bad"));
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(UploadOutcome::CreatedNotificationFailed).unwrap();
        assert_eq!(value, "created_notification_failed");
    }
}
