use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

use crate::config::{AppConfig, EmailConfig};
use crate::error::{AppError, AppResult};
use crate::extractors::CsvBody;
use crate::upload::session::{SubmitOptions, UploadFormat, UploadReport, UploadSession};

pub type AppState = (Arc<UploadSession>, Arc<AppConfig>);

/// Used when neither `email.base_url` nor a Host header is available
const FALLBACK_BASE_URL: &str = "http://localhost/";

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub validate_only: bool,
    pub send_emails: Option<bool>,
}

/// Absolute login URL for new-account emails
///
/// `email.base_url` wins; otherwise the request's Host header is used.
pub fn resolve_login_url(email: &EmailConfig, headers: &HeaderMap) -> AppResult<String> {
    let base = match &email.base_url {
        Some(base_url) => base_url.clone(),
        None => headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|host| format!("http://{}/", host))
            .unwrap_or_else(|| FALLBACK_BASE_URL.to_string()),
    };

    let base = Url::parse(&base)
        .map_err(|e| AppError::BadRequest(format!("Invalid base URL {}: {}", base, e)))?;
    let login_url = base
        .join(&email.login_url)
        .map_err(|e| AppError::Configuration(format!("Invalid login URL {}: {}", email.login_url, e)))?;

    Ok(login_url.to_string())
}

/// Describe the headers an upload needs
pub async fn upload_format(
    State((session, _)): State<AppState>,
) -> Json<UploadFormat> {
    Json(session.format())
}

/// Validate and (unless `validate_only`) create the uploaded accounts
pub async fn bulk_upload_users(
    State((session, app_config)): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    CsvBody(body): CsvBody,
) -> Result<Json<UploadReport>, (StatusCode, Json<serde_json::Value>)> {
    let login_url =
        resolve_login_url(&app_config.email, &headers).map_err(|e| e.to_response())?;

    let options = SubmitOptions {
        validate_only: params.validate_only,
        send_emails: params
            .send_emails
            .unwrap_or(app_config.email.send_by_default),
        login_url,
    };

    match session.submit(&body, &options).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => Err(e.to_response()),
    }
}
