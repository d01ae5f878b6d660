use axum::{
    extract::Request,
    http::{header, HeaderMap, Method, Uri},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::info;

/// One `access_log` event per request
///
/// Uploads are posted as raw bodies, so the request's declared size is
/// logged next to the response size.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_line = format_request(request.method(), request.uri());
    let remote_addr = client_address(request.headers());
    let user_agent = header_value(request.headers(), header::USER_AGENT.as_str()).to_string();
    let request_bytes = header_value(request.headers(), header::CONTENT_LENGTH.as_str()).to_string();

    let response = next.run(request).await;

    info!(
        target: "access_log",
        remote_addr = %remote_addr,
        request = %request_line,
        status = response.status().as_u16(),
        request_bytes = %request_bytes,
        response_bytes = %header_value(response.headers(), header::CONTENT_LENGTH.as_str()),
        latency_ms = start.elapsed().as_millis() as u64,
        user_agent = %user_agent,
        "request completed"
    );

    response
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-")
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`
fn client_address(headers: &HeaderMap) -> String {
    let forwarded = header_value(headers, "x-forwarded-for");
    if forwarded != "-" {
        return forwarded
            .split(',')
            .next()
            .unwrap_or(forwarded)
            .trim()
            .to_string();
    }
    header_value(headers, "x-real-ip").to_string()
}

fn format_request(method: &Method, uri: &Uri) -> String {
    format!("{} {}", method, uri)
}
