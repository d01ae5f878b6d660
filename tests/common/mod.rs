#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use bulk_user_upload::backend::database::DatabaseBackendConfig;
use bulk_user_upload::backend::{BackendFactory, UserStore};
use bulk_user_upload::config::{BootstrapConfig, PermissionConfig};
use bulk_user_upload::error::{AppError, AppResult};
use bulk_user_upload::models::{Account, UploadRow};
use bulk_user_upload::startup::bootstrap_grants;
use bulk_user_upload::upload::{MailTransport, OutboundEmail, SubmitOptions};

pub const LOGIN_URL: &str = "http://testserver/accounts/login/";

/// In-memory SQLite store with the schema in place and no grants
pub async fn setup_empty_store() -> Result<Arc<dyn UserStore>, Box<dyn std::error::Error>> {
    let store = BackendFactory::create(&DatabaseBackendConfig::memory_sqlite()).await?;
    store.init_schema().await?;
    Ok(store)
}

/// In-memory SQLite store seeded with `staff`, `editors` and a few permissions
pub async fn setup_test_store() -> Result<Arc<dyn UserStore>, Box<dyn std::error::Error>> {
    let store = setup_empty_store().await?;
    bootstrap_grants(store.as_ref(), &test_bootstrap()).await?;
    Ok(store)
}

pub fn test_bootstrap() -> BootstrapConfig {
    let permission = |app_label: &str, codename: &str| PermissionConfig {
        app_label: app_label.to_string(),
        codename: codename.to_string(),
        name: String::new(),
    };

    BootstrapConfig {
        groups: vec!["staff".to_string(), "editors".to_string()],
        permissions: vec![
            permission("users", "add_user"),
            permission("users", "change_user"),
            permission("reports", "view_report"),
        ],
    }
}

/// Build CSV text from a header line and data lines
pub fn csv(header: &str, lines: &[&str]) -> Vec<u8> {
    let mut content = String::from(header);
    content.push('\n');
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    content.into_bytes()
}

/// `count` valid rows named `user000`, `user001`, ...
pub fn generated_csv(count: usize) -> Vec<u8> {
    let lines: Vec<String> = (0..count)
        .map(|i| format!("user{:03},user{:03}@example.com,,", i, i))
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    csv("username,email,groups,permissions", &refs)
}

pub fn row(index: usize, pairs: &[(&str, &str)]) -> UploadRow {
    UploadRow::from_pairs(index, pairs.iter().copied())
}

pub fn submit_options(validate_only: bool, send_emails: bool) -> SubmitOptions {
    SubmitOptions {
        validate_only,
        send_emails,
        login_url: LOGIN_URL.to_string(),
    }
}

/// Insert accounts directly, bypassing validation
pub async fn insert_existing(
    store: &Arc<dyn UserStore>,
    accounts: &[(&str, &str)],
) -> Result<(), Box<dyn std::error::Error>> {
    use bulk_user_upload::backend::database::AccountInsertProcessor;
    use bulk_user_upload::models::UploadColumns;

    let columns = UploadColumns::default();
    let prepared = accounts
        .iter()
        .enumerate()
        .map(|(i, (username, email))| {
            AccountInsertProcessor::prepare_account(
                &row(i, &[("username", *username), ("email", *email)]),
                &columns,
                chrono::Utc::now(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut tx = store.begin().await?;
    tx.insert_accounts(&prepared).await?;
    tx.commit().await?;
    Ok(())
}

/// Mail transport that keeps every message it is handed
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    fail_for: Vec<String>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails delivery to the listed recipients and records the rest
    pub fn failing_for(recipients: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_for: recipients.iter().map(|r| r.to_string()).collect(),
        })
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.recipient).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutboundEmail) -> AppResult<()> {
        if self.fail_for.contains(&email.recipient) {
            return Err(AppError::Notification(format!(
                "mailbox unavailable: {}",
                email.recipient
            )));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn usernames(accounts: &[Account]) -> Vec<String> {
    accounts.iter().map(|a| a.username.clone()).collect()
}
