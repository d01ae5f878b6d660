use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::{Severity, UploadColumns};

lazy_static! {
    /// `${NAME}` or `${NAME:-default}`
    static ref ENV_VAR_REGEX: Regex = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: String,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Column names and validation overrides for uploaded files
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_email_field")]
    pub email_field: String,
    #[serde(default = "default_groups_field")]
    pub groups_field: String,
    #[serde(default = "default_permissions_field")]
    pub permissions_field: String,
    #[serde(default)]
    pub email_collision: EmailCollisionPolicy,
    #[serde(default)]
    pub field_rules: Vec<FieldRuleConfig>,
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_email_field() -> String {
    "email".to_string()
}

fn default_groups_field() -> String {
    "groups".to_string()
}

fn default_permissions_field() -> String {
    "permissions".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            username_field: default_username_field(),
            email_field: default_email_field(),
            groups_field: default_groups_field(),
            permissions_field: default_permissions_field(),
            email_collision: EmailCollisionPolicy::default(),
            field_rules: Vec::new(),
        }
    }
}

impl UploadConfig {
    pub fn columns(&self) -> UploadColumns {
        UploadColumns {
            username: self.username_field.clone(),
            email: self.email_field.clone(),
            groups: self.groups_field.clone(),
            permissions: self.permissions_field.clone(),
        }
    }
}

/// How an uploaded email already held by another username is reported
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailCollisionPolicy {
    #[default]
    Warning,
    Error,
    Off,
}

impl EmailCollisionPolicy {
    /// Severity of the issue, `None` when the check is switched off
    pub fn severity(self) -> Option<Severity> {
        match self {
            EmailCollisionPolicy::Warning => Some(Severity::Warning),
            EmailCollisionPolicy::Error => Some(Severity::Error),
            EmailCollisionPolicy::Off => None,
        }
    }
}

/// Per-column override of the field validator registry
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FieldRuleConfig {
    pub column: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub sender_address: Option<String>,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub template_path: Option<String>,
    #[serde(default = "default_true")]
    pub send_by_default: bool,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

fn default_subject() -> String {
    "Account Created".to_string()
}

fn default_login_url() -> String {
    "/".to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            sender_address: None,
            login_url: default_login_url(),
            base_url: None,
            template_path: None,
            send_by_default: true,
            smtp: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

/// Groups and permissions created at startup when missing
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PermissionConfig {
    pub app_label: String,
    pub codename: String,
    #[serde(default)]
    pub name: String,
}

impl AppConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, String> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(format!("Configuration file not found: {}", path.display()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        // Expand environment variables in YAML content
        let expanded_content = Self::expand_env_vars(&content)?;

        let app_config: AppConfig = serde_yaml::from_str(&expanded_content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        if app_config.backend.backend_type == "database" && app_config.backend.database.is_none() {
            return Err(
                "Database configuration is required when backend type is 'database'".to_string(),
            );
        }

        Ok(app_config)
    }

    /// Create default configuration for in-memory SQLite with mail written to the log
    pub fn default_config() -> Self {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            backend: BackendConfig {
                backend_type: "database".to_string(),
                database: Some(DatabaseConfig {
                    db_type: "sqlite".to_string(),
                    url: ":memory:".to_string(),
                    max_connections: 1,
                }),
            },
            upload: UploadConfig::default(),
            email: EmailConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let mut expanded = String::with_capacity(content.len());
        let mut last = 0;

        for captures in ENV_VAR_REGEX.captures_iter(content) {
            let (Some(whole), Some(var_name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };

            let value = match (std::env::var(var_name.as_str()), captures.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    return Err(format!(
                        "Environment variable {} not found and no default provided",
                        var_name.as_str()
                    ))
                }
            };

            expanded.push_str(&content[last..whole.start()]);
            expanded.push_str(&value);
            last = whole.end();
        }

        expanded.push_str(&content[last..]);
        Ok(expanded)
    }

    /// Address new-account mail is sent from
    pub fn sender_address(&self) -> &str {
        self.email
            .sender_address
            .as_deref()
            .unwrap_or(crate::upload::notify::DEFAULT_FROM_ADDRESS)
    }
}
