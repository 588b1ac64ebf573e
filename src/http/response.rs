//! Response construction and header hygiene.
//!
//! # Responsibilities
//! - Build the gateway's own responses (404, 503, errors) with generic bodies
//! - Strip hop-by-hop headers before a message crosses the gateway
//! - Convert buffered responses for axum
//!
//! # Design Decisions
//! - Error bodies carry the canonical reason phrase only, never internal detail
//! - Headers named in `Connection` are hop-by-hop too

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::Bytes;

/// Headers that apply to a single transport hop.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Plain-text response with the given body.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Generic error response: the reason phrase and nothing else.
pub fn error_response(status: StatusCode) -> Response<Bytes> {
    let reason = status.canonical_reason().unwrap_or("Error");
    text_response(status, Bytes::from(reason))
}

/// Response without a body.
pub fn empty_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

/// Remove hop-by-hop headers. With `keep_upgrade`, `Connection: Upgrade`
/// and `Upgrade` survive so the peer can switch protocols.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        if keep_upgrade && name == header::UPGRADE {
            continue;
        }
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        if keep_upgrade && (*name == "connection" || *name == "upgrade") {
            continue;
        }
        headers.remove(*name);
    }

    if keep_upgrade && headers.contains_key(header::UPGRADE) {
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    }
}

/// True if a comma-separated header contains `token` (case-insensitive).
pub fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Hand a buffered response to axum.
pub fn into_axum(response: Response<Bytes>) -> axum::response::Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_is_reason_phrase() {
        let response = error_response(StatusCode::BAD_GATEWAY);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.body().as_ref(), b"Bad Gateway");
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"));

        strip_hop_by_hop(&mut headers, false);

        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("x-trace"));
        assert!(!headers.contains_key(header::TRANSFER_ENCODING));
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn upgrade_headers_can_be_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));

        strip_hop_by_hop(&mut headers, true);

        assert_eq!(headers.get(header::CONNECTION).unwrap(), "Upgrade");
        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert!(!headers.contains_key("keep-alive"));
    }

    #[test]
    fn token_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, UPGRADE"));
        assert!(header_has_token(&headers, header::CONNECTION, "upgrade"));
        assert!(!header_has_token(&headers, header::CONNECTION, "close"));
    }
}
