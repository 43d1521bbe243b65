// Correlation id handling
//
// Inbound `X-Correlation-ID` is honored when present; otherwise an opaque
// token is generated. The id rides through every row persisted during the
// request and comes back in every response body.

use axum::http::HeaderMap;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Inbound correlation id, if the caller sent one.
pub fn extract(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
}

/// Inbound correlation id or a fresh opaque token.
pub fn or_generate(headers: &HeaderMap) -> String {
    extract(headers).unwrap_or_else(|| Uuid::now_v7().simple().to_string())
}
