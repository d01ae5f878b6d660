use std::sync::Arc;

use crate::backend::database::DatabaseBackendConfig;
use crate::backend::{BackendFactory, UserStore};
use crate::config::{AppConfig, BootstrapConfig, EmailConfig};
use crate::error::{AppError, AppResult};
use crate::upload::{LogMailTransport, MailTransport, SmtpMailTransport};

/// Connect the configured store, create its schema and bootstrap grants
pub async fn initialize_store(config: &AppConfig) -> AppResult<Arc<dyn UserStore>> {
    if config.backend.backend_type != "database" {
        return Err(AppError::Configuration(format!(
            "Unsupported backend type: {}",
            config.backend.backend_type
        )));
    }

    let database_config = config.backend.database.as_ref().ok_or_else(|| {
        AppError::Configuration(
            "Database configuration is required when backend type is 'database'".to_string(),
        )
    })?;

    let backend_config = DatabaseBackendConfig::from_settings(database_config)?;
    let store = BackendFactory::create(&backend_config).await?;
    store.init_schema().await?;
    tracing::info!(database = %database_config.db_type, "Account store ready");

    bootstrap_grants(store.as_ref(), &config.bootstrap).await?;

    Ok(store)
}

/// Create the configured groups and permissions that do not exist yet
pub async fn bootstrap_grants(store: &dyn UserStore, config: &BootstrapConfig) -> AppResult<()> {
    for group in &config.groups {
        store.ensure_group(group).await?;
    }

    for permission in &config.permissions {
        let name = if permission.name.is_empty() {
            format!("{}.{}", permission.app_label, permission.codename)
        } else {
            permission.name.clone()
        };
        store
            .ensure_permission(&permission.app_label, &permission.codename, &name)
            .await?;
    }

    if !config.groups.is_empty() || !config.permissions.is_empty() {
        tracing::info!(
            groups = config.groups.len(),
            permissions = config.permissions.len(),
            "Bootstrapped groups and permissions"
        );
    }
    Ok(())
}

/// SMTP when configured, otherwise messages go to the log
pub fn mail_transport(config: &EmailConfig) -> AppResult<Arc<dyn MailTransport>> {
    match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Sending account emails over SMTP");
            Ok(Arc::new(SmtpMailTransport::from_config(smtp)?))
        }
        None => {
            tracing::info!("No SMTP server configured; account emails are written to the log");
            Ok(Arc::new(LogMailTransport))
        }
    }
}
