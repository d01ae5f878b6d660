use axum::{http::StatusCode, Json};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Database(String),
    Serialization(serde_json::Error),
    BadRequest(String),
    /// Upload rejected before any row was inspected (row cap, headers, unreadable CSV)
    InputShape(String),
    /// Uniqueness violation surfacing while accounts are inserted
    Conflict(String),
    Creation(String),
    /// Raised after the creation transaction committed
    Notification(String),
    Internal(String),
    Configuration(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::InputShape(e) => write!(f, "{}", e),
            AppError::Conflict(e) => write!(f, "Conflict: {}", e),
            AppError::Creation(e) => write!(f, "Creation error: {}", e),
            AppError::Notification(e) => write!(f, "Notification error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::InputShape(format!("Unable to read uploaded CSV: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Map store errors, turning uniqueness violations into `Conflict`
pub fn map_database_error(error: sqlx::Error, context: &str) -> AppError {
    let error_str = error.to_string();
    if error_str.contains("duplicate key") || error_str.contains("UNIQUE constraint") {
        if error_str.contains("username") {
            AppError::Conflict(format!("{}: username already exists", context))
        } else {
            AppError::Conflict(format!("{}: {}", context, error_str))
        }
    } else {
        AppError::Database(format!("{}: {}", context, error_str))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InputShape(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response(&self) -> (StatusCode, Json<serde_json::Value>) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let message = match self {
            AppError::BadRequest(e) | AppError::InputShape(e) => e.clone(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message })))
    }
}
