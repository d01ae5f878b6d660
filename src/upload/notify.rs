//! Notification Dispatcher
//!
//! Formats one message per created account and hands it to a [`MailTransport`].
//! Every recipient is attempted; failures are collected and reported together.

use async_trait::async_trait;
use lazy_static::lazy_static;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::{Captures, Regex};
use std::sync::Arc;

use crate::config::SmtpConfig;
use crate::error::{AppError, AppResult};
use crate::models::Account;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\{\{ ?(login_url|username|recipient_name) ?\}\}").unwrap();
}

/// Sender used when none is configured
pub const DEFAULT_FROM_ADDRESS: &str = "webmaster@localhost";

pub const DEFAULT_TEMPLATE: &str = "Hello {{ recipient_name }},

An account has been created for you with the username {{ username }}.

You can sign in at {{ login_url }}
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Delivers one message
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> AppResult<()>;
}

/// SMTP delivery over STARTTLS
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn from_config(config: &SmtpConfig) -> AppResult<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                AppError::Configuration(format!("Invalid SMTP relay {}: {}", config.host, e))
            })?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, email: &OutboundEmail) -> AppResult<()> {
        let from: Mailbox = email.from.parse().map_err(|e| {
            AppError::Notification(format!("Invalid sender address {}: {}", email.from, e))
        })?;
        let to: Mailbox = email.recipient.parse().map_err(|e| {
            AppError::Notification(format!("Invalid recipient address {}: {}", email.recipient, e))
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| AppError::Notification(format!("Failed to build message: {}", e)))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| AppError::Notification(format!("SMTP delivery failed: {}", e)))?;

        tracing::info!(to = %email.recipient, "Account email sent");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, email: &OutboundEmail) -> AppResult<()> {
        tracing::info!(
            from = %email.from,
            to = %email.recipient,
            subject = %email.subject,
            body = %email.body,
            "Account email (log transport)"
        );
        Ok(())
    }
}

/// Derives the greeting name for an account
pub type RecipientNameFn = Arc<dyn Fn(&Account) -> String + Send + Sync>;

/// "First Last" when both are present, else the email address
pub fn default_recipient_name(account: &Account) -> String {
    if !account.first_name.is_empty() && !account.last_name.is_empty() {
        format!("{} {}", account.first_name, account.last_name)
    } else {
        account.email.clone()
    }
}

/// Message body with `{{ login_url }}`, `{{ username }}` and `{{ recipient_name }}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    source: String,
}

impl EmailTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Read the template at `path`, or use the built-in one
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        match path {
            Some(path) => std::fs::read_to_string(path).map(Self::new).map_err(|e| {
                AppError::Configuration(format!("Failed to read email template {}: {}", path, e))
            }),
            None => Ok(Self::default()),
        }
    }

    /// Substitute every placeholder in one pass; substituted values are never rescanned
    pub fn render(&self, login_url: &str, username: &str, recipient_name: &str) -> String {
        PLACEHOLDER_REGEX
            .replace_all(&self.source, |caps: &Captures| match &caps[1] {
                "login_url" => login_url.to_string(),
                "username" => username.to_string(),
                _ => recipient_name.to_string(),
            })
            .into_owned()
    }
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Everything one dispatch needs besides the accounts
pub struct NotificationRequest<'a> {
    pub template: &'a EmailTemplate,
    pub login_url: &'a str,
    pub from_address: &'a str,
    pub subject: &'a str,
    pub recipient_name: &'a RecipientNameFn,
}

pub struct Notifier {
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    pub fn compose(request: &NotificationRequest<'_>, account: &Account) -> OutboundEmail {
        OutboundEmail {
            from: request.from_address.to_string(),
            recipient: account.email.clone(),
            subject: request.subject.to_string(),
            body: request.template.render(
                request.login_url,
                &account.username,
                &(request.recipient_name)(account),
            ),
        }
    }

    /// Send one message per account, returning how many were delivered
    ///
    /// A failed recipient does not stop the others; if any failed the
    /// returned error names each of them.
    pub async fn send(
        &self,
        request: &NotificationRequest<'_>,
        accounts: &[Account],
    ) -> AppResult<usize> {
        let mut failures = Vec::new();

        for account in accounts {
            let email = Self::compose(request, account);
            if let Err(e) = self.transport.send(&email).await {
                failures.push(format!("{}: {}", email.recipient, e));
            }
        }

        if failures.is_empty() {
            return Ok(accounts.len());
        }

        Err(AppError::Notification(format!(
            "{} of {} emails failed ({})",
            failures.len(),
            accounts.len(),
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recipient_name() {
        let mut account = Account::new("alice", "alice@example.com");
        assert_eq!(default_recipient_name(&account), "alice@example.com");

        account.first_name = "Alice".to_string();
        assert_eq!(default_recipient_name(&account), "alice@example.com");

        account.last_name = "Liddell".to_string();
        assert_eq!(default_recipient_name(&account), "Alice Liddell");
    }

    #[test]
    fn test_render_template() {
        let template = EmailTemplate::new("Hi {{ recipient_name }} ({{username}}), go to {{ login_url }}");
        assert_eq!(
            template.render("https://app.example.com/login", "alice", "Alice Liddell"),
            "Hi Alice Liddell (alice), go to https://app.example.com/login"
        );
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let template = EmailTemplate::new("{{ login_url }} for {{ username }}");
        assert_eq!(
            template.render("https://app.example.com/?next={{ username }}", "alice", "Alice"),
            "https://app.example.com/?next={{ username }} for alice"
        );

        let template = EmailTemplate::new("Dear {{recipient_name}}, {{ unknown }}");
        assert_eq!(
            template.render("https://x.io/", "bob", "{{login_url}}"),
            "Dear {{login_url}}, {{ unknown }}"
        );
    }

    #[test]
    fn test_default_template_mentions_every_placeholder() {
        let body = EmailTemplate::default().render("https://x.io/", "bob", "Bob Smith");
        assert!(body.contains("Hello Bob Smith,"));
        assert!(body.contains("username bob"));
        assert!(body.contains("https://x.io/"));
        assert!(!body.contains("{{"));
    }

    #[test]
    fn test_missing_template_file() {
        let result = EmailTemplate::load(Some("/nonexistent/template.txt"));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_log_transport_accepts_everything() {
        let notifier = Notifier::new(Arc::new(LogMailTransport));
        let template = EmailTemplate::default();
        let recipient_name: RecipientNameFn = Arc::new(default_recipient_name);
        let request = NotificationRequest {
            template: &template,
            login_url: "http://localhost/",
            from_address: DEFAULT_FROM_ADDRESS,
            subject: "Account Created",
            recipient_name: &recipient_name,
        };
        let accounts = vec![
            Account::new("alice", "alice@example.com"),
            Account::new("bob", "bob@example.com"),
        ];

        assert_eq!(notifier.send(&request, &accounts).await.unwrap(), 2);
    }
}
