//! Request inspection helpers.
//!
//! # Responsibilities
//! - Attach a request id (`X-Request-ID`) as early as possible
//! - Detect the protocol a client asks to switch to
//! - Answer framing questions (HTTP/1.0, `Expect: 100-continue`)

use axum::http::{header, HeaderValue, Request, Version};

use crate::http::response::header_has_token;

/// Correlation header propagated to backends.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Return the request id, generating one if the client sent none.
pub fn ensure_request_id<B>(request: &mut Request<B>) -> String {
    if let Some(id) = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return id.to_string();
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert(X_REQUEST_ID, value);
    }
    id
}

/// Lowercased `Upgrade` protocol when `Connection` contains `upgrade`.
pub fn requested_upgrade<B>(request: &Request<B>) -> Option<String> {
    if !header_has_token(request.headers(), header::CONNECTION, "upgrade") {
        return None;
    }
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

pub fn is_http10<B>(request: &Request<B>) -> bool {
    request.version() == Version::HTTP_10
}

pub fn expects_continue<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(header::EXPECT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false)
}
