pub mod upload;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::upload::UploadSession;

/// Path of the bulk upload endpoint
pub const BULK_UPLOAD_PATH: &str = "/admin/bulk_upload_users";

/// Router exposing the upload endpoints with access logging
pub fn router(session: Arc<UploadSession>, app_config: Arc<AppConfig>) -> Router {
    Router::new()
        .route(
            BULK_UPLOAD_PATH,
            get(upload::upload_format).post(upload::bulk_upload_users),
        )
        .layer(middleware::from_fn(crate::logging::logging_middleware))
        .with_state((session, app_config))
}
