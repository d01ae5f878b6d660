use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Media types accepted for an uploaded CSV body
const CSV_MEDIA_TYPES: [&str; 4] = [
    "text/csv",
    "application/csv",
    "text/plain",
    "application/octet-stream",
];

/// Raw CSV request body
///
/// A missing Content-Type is accepted; anything other than the CSV-ish media
/// types above is rejected before the body is read.
pub struct CsvBody(pub Bytes);

impl<S> FromRequest<S> for CsvBody
where
    S: Send + Sync,
{
    type Rejection = CsvBodyRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(content_type) = req.headers().get(header::CONTENT_TYPE) {
            let content_type_str = content_type
                .to_str()
                .map_err(|_| CsvBodyRejection::InvalidContentType)?;

            // Extract the media type without parameters (e.g., charset)
            let media_type = content_type_str
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_lowercase();

            if !CSV_MEDIA_TYPES.contains(&media_type.as_str()) {
                return Err(CsvBodyRejection::InvalidContentType);
            }
        }

        match Bytes::from_request(req, state).await {
            Ok(body) => Ok(CsvBody(body)),
            Err(rejection) => Err(CsvBodyRejection::Body(rejection)),
        }
    }
}

pub enum CsvBodyRejection {
    InvalidContentType,
    Body(BytesRejection),
}

impl IntoResponse for CsvBodyRejection {
    fn into_response(self) -> Response {
        match self {
            CsvBodyRejection::InvalidContentType => {
                let body = Json(json!({
                    "error": "Content-Type must be text/csv"
                }));
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, body).into_response()
            }
            CsvBodyRejection::Body(rejection) => {
                let body = Json(json!({
                    "error": format!("Unable to read request body: {}", rejection)
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
        }
    }
}
