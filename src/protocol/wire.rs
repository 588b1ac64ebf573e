//! HTTP/1.x wire codec for backend connections.
//!
//! Requests are serialized from the buffered exchange request; responses are
//! parsed with `httparse` straight out of the connection buffer so that bytes
//! past the message (pipelined data, upgraded protocol frames) stay there.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use bytes::{Buf, Bytes, BytesMut};

use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::net::connection::Connection;

const MAX_HEADERS: usize = 100;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound for a buffered backend response body.
pub const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Status line and headers of a backend response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// `Connection: close`, or HTTP/1.0 without `keep-alive`.
    pub fn wants_close(&self) -> bool {
        let connection = self
            .headers
            .get_all(axum::http::header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect::<Vec<_>>();
        if connection.iter().any(|t| t == "close") {
            return true;
        }
        self.version == Version::HTTP_10 && !connection.iter().any(|t| t == "keep-alive")
    }
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    pub fn of(request_method: &Method, head: &ResponseHead) -> GatewayResult<Self> {
        let status = head.status.as_u16();
        if request_method == Method::HEAD
            || head.status.is_informational()
            || status == 204
            || status == 304
            || (request_method == Method::CONNECT && head.status.is_success())
        {
            return Ok(Self::Empty);
        }

        let chunked = head
            .headers
            .get_all(axum::http::header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Ok(Self::Chunked);
        }

        match head.headers.get(axum::http::header::CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .map(Self::Length)
                .ok_or_else(|| protocol_error("invalid Content-Length")),
            None => Ok(Self::UntilClose),
        }
    }
}

fn protocol_error(message: &str) -> GatewayError {
    GatewayError::transport(FailureKind::Other, "backend", message)
}

/// Serialize a request head. `target` is the request-target (origin form,
/// or authority form for CONNECT).
pub fn encode_head(method: &Method, target: &str, version: Version, headers: &HeaderMap) -> Vec<u8> {
    let version = if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(version.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Try to parse a response head from the front of `buf`, consuming it.
pub fn parse_head(buf: &mut BytesMut) -> GatewayResult<Option<ResponseHead>> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut storage);
    let consumed = match parsed.parse(&buf[..]) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > MAX_HEAD_BYTES {
                return Err(protocol_error("response head too large"));
            }
            return Ok(None);
        }
        Err(e) => return Err(protocol_error(&format!("malformed response: {}", e))),
    };

    let status = parsed
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| protocol_error("invalid status code"))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for h in parsed.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| protocol_error("invalid header name"))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| protocol_error("invalid header value"))?;
        headers.append(name, value);
    }

    buf.advance(consumed);
    Ok(Some(ResponseHead {
        status,
        version,
        headers,
    }))
}

/// Read one response head. End of stream before a status line is `NoResponse`.
pub async fn read_head(conn: &mut Connection) -> GatewayResult<ResponseHead> {
    loop {
        if let Some(head) = parse_head(conn.buffer_mut())? {
            return Ok(head);
        }
        if conn.read_more().await? == 0 {
            let kind = if conn.buffer().is_empty() {
                FailureKind::NoResponse
            } else {
                FailureKind::Reset
            };
            return Err(GatewayError::transport(kind, conn.key(), "connection closed before response head"));
        }
    }
}

/// Read the body delimited by `framing`. Bodies longer than `limit` are a
/// protocol error.
pub async fn read_body(conn: &mut Connection, framing: BodyFraming, limit: usize) -> GatewayResult<Bytes> {
    match framing {
        BodyFraming::Empty => Ok(Bytes::new()),
        BodyFraming::Length(len) => {
            if len > limit {
                return Err(body_too_large());
            }
            while conn.buffer().len() < len {
                if conn.read_more().await? == 0 {
                    return Err(closed_mid_body(conn));
                }
            }
            Ok(conn.buffer_mut().split_to(len).freeze())
        }
        BodyFraming::UntilClose => {
            while conn.buffer().len() <= limit {
                if conn.read_more().await? == 0 {
                    let len = conn.buffer().len();
                    return Ok(conn.buffer_mut().split_to(len).freeze());
                }
            }
            Err(body_too_large())
        }
        BodyFraming::Chunked => read_chunked(conn, limit).await,
    }
}

fn closed_mid_body(conn: &Connection) -> GatewayError {
    GatewayError::transport(FailureKind::Reset, conn.key(), "connection closed mid-body")
}

fn body_too_large() -> GatewayError {
    protocol_error("response body too large")
}

async fn read_chunked(conn: &mut Connection, limit: usize) -> GatewayResult<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let (offset, size) = loop {
            match httparse::parse_chunk_size(conn.buffer()) {
                Ok(httparse::Status::Complete((offset, size))) => break (offset, size),
                Ok(httparse::Status::Partial) => {
                    if conn.read_more().await? == 0 {
                        return Err(closed_mid_body(conn));
                    }
                }
                Err(_) => return Err(protocol_error("invalid chunk size")),
            }
        };
        let size = usize::try_from(size)
            .ok()
            .filter(|size| *size <= limit - body.len())
            .ok_or_else(body_too_large)?;
        let framed = size.checked_add(2).ok_or_else(body_too_large)?;
        conn.buffer_mut().advance(offset);

        if size == 0 {
            skip_trailers(conn).await?;
            return Ok(body.freeze());
        }

        while conn.buffer().len() < framed {
            if conn.read_more().await? == 0 {
                return Err(closed_mid_body(conn));
            }
        }
        body.extend_from_slice(&conn.buffer()[..size]);
        if &conn.buffer()[size..framed] != b"\r\n" {
            return Err(protocol_error("chunk not terminated by CRLF"));
        }
        conn.buffer_mut().advance(framed);
    }
}

/// Consume trailer lines up to and including the terminating empty line.
async fn skip_trailers(conn: &mut Connection) -> GatewayResult<()> {
    loop {
        match conn.buffer().windows(2).position(|w| w == b"\r\n") {
            Some(0) => {
                conn.buffer_mut().advance(2);
                return Ok(());
            }
            Some(pos) => conn.buffer_mut().advance(pos + 2),
            None => {
                if conn.read_more().await? == 0 {
                    return Err(closed_mid_body(conn));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn serve(bytes: &'static [u8]) -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(bytes).await.unwrap();
        });
        Connection::open("127.0.0.1", port, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[test]
    fn encodes_request_head() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("example.org"));
        let head = encode_head(&Method::GET, "/foo?a=1", Version::HTTP_11, &headers);
        assert_eq!(head, b"GET /foo?a=1 HTTP/1.1\r\nhost: example.org\r\n\r\n".to_vec());
    }

    #[test]
    fn parses_head_and_leaves_rest() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"[..]);
        let head = parse_head(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(&buf[..], b"hi");

        let mut partial = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent"[..]);
        assert!(parse_head(&mut partial).unwrap().is_none());
    }

    #[test]
    fn framing_rules() {
        let head = |raw: &[u8]| parse_head(&mut BytesMut::from(raw)).unwrap().unwrap();

        let ok = head(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(BodyFraming::of(&Method::GET, &ok).unwrap(), BodyFraming::Length(5));
        assert_eq!(BodyFraming::of(&Method::HEAD, &ok).unwrap(), BodyFraming::Empty);

        let chunked = head(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(BodyFraming::of(&Method::GET, &chunked).unwrap(), BodyFraming::Chunked);

        let bare = head(b"HTTP/1.0 200 OK\r\n\r\n");
        assert_eq!(BodyFraming::of(&Method::GET, &bare).unwrap(), BodyFraming::UntilClose);
        assert!(bare.wants_close());

        let no_content = head(b"HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(BodyFraming::of(&Method::GET, &no_content).unwrap(), BodyFraming::Empty);
        assert!(!no_content.wants_close());
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let mut conn = serve(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2;ext=1\r\nde\r\n0\r\nX-Trailer: 1\r\n\r\n").await;
        let head = read_head(&mut conn).await.unwrap();
        let framing = BodyFraming::of(&Method::GET, &head).unwrap();
        let body = read_body(&mut conn, framing, MAX_RESPONSE_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abcde");
        assert!(conn.buffer().is_empty());
    }

    #[tokio::test]
    async fn reads_until_close() {
        let mut conn = serve(b"HTTP/1.0 200 OK\r\n\r\nall of it").await;
        let head = read_head(&mut conn).await.unwrap();
        let body = read_body(&mut conn, BodyFraming::UntilClose, MAX_RESPONSE_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(head.version, Version::HTTP_10);
        assert_eq!(&body[..], b"all of it");
    }

    #[tokio::test]
    async fn empty_close_is_no_response() {
        let mut conn = serve(b"").await;
        let err = read_head(&mut conn).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::NoResponse));
    }

    #[tokio::test]
    async fn truncated_body_is_reset() {
        let mut conn = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").await;
        let head = read_head(&mut conn).await.unwrap();
        let framing = BodyFraming::of(&Method::GET, &head).unwrap();
        let err = read_body(&mut conn, framing, MAX_RESPONSE_BODY_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Reset));
    }

    #[tokio::test]
    async fn oversized_chunk_size_is_rejected() {
        let mut conn = serve(b"ffffffffffffffff\r\nab\r\n0\r\n\r\n").await;
        let err = read_body(&mut conn, BodyFraming::Chunked, MAX_RESPONSE_BODY_BYTES)
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Other));
    }

    #[tokio::test]
    async fn chunked_body_over_limit_is_rejected() {
        let mut conn = serve(b"4\r\nabcd\r\n4\r\nefgh\r\n0\r\n\r\n").await;
        let err = read_body(&mut conn, BodyFraming::Chunked, 6).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Other));
    }

    #[tokio::test]
    async fn declared_length_over_limit_is_rejected() {
        let mut conn = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 10000000000\r\n\r\n").await;
        let head = read_head(&mut conn).await.unwrap();
        let framing = BodyFraming::of(&Method::GET, &head).unwrap();
        let err = read_body(&mut conn, framing, MAX_RESPONSE_BODY_BYTES).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Other));
    }

    #[tokio::test]
    async fn close_delimited_body_over_limit_is_rejected() {
        let mut conn = serve(b"HTTP/1.0 200 OK\r\n\r\nmore than eight bytes").await;
        read_head(&mut conn).await.unwrap();
        let err = read_body(&mut conn, BodyFraming::UntilClose, 8).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Other));

        let mut exact = serve(b"HTTP/1.0 200 OK\r\n\r\neight!!!").await;
        read_head(&mut exact).await.unwrap();
        let body = read_body(&mut exact, BodyFraming::UntilClose, 8).await.unwrap();
        assert_eq!(&body[..], b"eight!!!");
    }
}
