//! Default HTTP/1.1 handler.
//!
//! # Responsibilities
//! - Serialize the buffered request and read one response
//! - CONNECT tunnels: answer `200` once the backend connection is open
//! - `Expect: 100-continue`: send the head, wait for the interim response,
//!   then the body. A final response instead ends the attempt unsent.
//! - HTTP/1.0 clients: no keep-alive, write side shut down after the request

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode, Version};
use bytes::Bytes;

use crate::error::{GatewayError, GatewayResult};
use crate::exchange::{Exchange, UpgradeState};
use crate::http::request::{expects_continue, is_http10};
use crate::http::response::{empty_response, strip_hop_by_hop};
use crate::net::connection::Connection;
use crate::protocol::handler::{Destination, ProtocolHandler, Upstream};
use crate::protocol::wire::{self, BodyFraming, ResponseHead};

#[derive(Debug, Default, Clone, Copy)]
pub struct Http1Handler;

impl Http1Handler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolHandler for Http1Handler {
    fn name(&self) -> &str {
        "http/1.1"
    }

    fn can_handle(&self, _requested: &str, _exchange: &Exchange) -> bool {
        false
    }

    async fn handle(
        &self,
        exchange: &Exchange,
        connection: Connection,
        destination: &Destination,
    ) -> GatewayResult<Upstream> {
        forward(exchange, connection, destination, false).await
    }
}

/// Outbound headers: hop-by-hop removed, Host rewritten, length recomputed.
fn outbound_headers(
    exchange: &Exchange,
    destination: &Destination,
    keep_upgrade: bool,
    expect_continue: bool,
) -> GatewayResult<HeaderMap> {
    let request = exchange.request();
    let mut headers = request.headers().clone();
    strip_hop_by_hop(&mut headers, keep_upgrade);

    let host = HeaderValue::from_str(&destination.authority())
        .map_err(|_| GatewayError::MalformedUrl(destination.to_string()))?;
    headers.insert(header::HOST, host);

    let body = request.body();
    let method = request.method();
    if !body.is_empty() || *method == Method::POST || *method == Method::PUT || *method == Method::PATCH {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    } else {
        headers.remove(header::CONTENT_LENGTH);
    }

    if !expect_continue {
        headers.remove(header::EXPECT);
    }
    if is_http10(request) {
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    Ok(headers)
}

/// Send the exchange request over `conn` and read the response.
/// `keep_upgrade` forwards `Connection: Upgrade` / `Upgrade` for protocol switches.
pub(crate) async fn forward(
    exchange: &Exchange,
    mut conn: Connection,
    destination: &Destination,
    keep_upgrade: bool,
) -> GatewayResult<Upstream> {
    let request = exchange.request();
    let method = request.method().clone();

    if method == Method::CONNECT {
        tracing::debug!(
            exchange_id = %exchange.id(),
            destination = %destination,
            "Tunnel established"
        );
        return Ok(Upstream {
            response: empty_response(StatusCode::OK),
            connection: Some(conn),
            upgrade: UpgradeState::Tunnel,
            reusable: false,
        });
    }

    let http10 = is_http10(request);
    let body = request.body();
    let expect_continue = expects_continue(request) && !body.is_empty();
    let headers = outbound_headers(exchange, destination, keep_upgrade, expect_continue)?;
    let version = if http10 { Version::HTTP_10 } else { Version::HTTP_11 };
    let head = wire::encode_head(&method, destination.path_and_query(), version, &headers);

    let mut body_sent = true;
    let response_head = if expect_continue {
        conn.write_all(&head).await?;
        let interim = wire::read_head(&mut conn).await?;
        if interim.status == StatusCode::CONTINUE {
            conn.write_all(body).await?;
            finish_request(&mut conn, http10).await?;
            read_final_head(&mut conn).await?
        } else {
            tracing::debug!(
                exchange_id = %exchange.id(),
                status = interim.status.as_u16(),
                "Backend answered before 100-continue, body not sent"
            );
            body_sent = false;
            interim
        }
    } else {
        let mut message = head;
        message.extend_from_slice(body);
        conn.write_all(&message).await?;
        finish_request(&mut conn, http10).await?;
        read_final_head(&mut conn).await?
    };

    if response_head.status == StatusCode::SWITCHING_PROTOCOLS {
        let response = build_response(response_head, Bytes::new(), true);
        return Ok(Upstream {
            response,
            connection: Some(conn),
            upgrade: UpgradeState::None,
            reusable: false,
        });
    }

    let framing = BodyFraming::of(&method, &response_head)?;
    let response_body = wire::read_body(&mut conn, framing, wire::MAX_RESPONSE_BODY_BYTES).await?;
    let reusable = body_sent
        && !http10
        && framing != BodyFraming::UntilClose
        && !response_head.wants_close()
        && conn.buffer().is_empty();

    Ok(Upstream {
        response: build_response(response_head, response_body, false),
        connection: if reusable { Some(conn) } else { None },
        upgrade: UpgradeState::None,
        reusable,
    })
}

async fn finish_request(conn: &mut Connection, http10: bool) -> GatewayResult<()> {
    if http10 {
        conn.shutdown_write().await?;
    }
    Ok(())
}

/// Skip interim responses other than `101`.
async fn read_final_head(conn: &mut Connection) -> GatewayResult<ResponseHead> {
    loop {
        let head = wire::read_head(conn).await?;
        if !head.status.is_informational() || head.status == StatusCode::SWITCHING_PROTOCOLS {
            return Ok(head);
        }
    }
}

fn build_response(head: ResponseHead, body: Bytes, keep_upgrade: bool) -> Response<Bytes> {
    let mut headers = head.headers;
    strip_hop_by_hop(&mut headers, keep_upgrade);
    if !keep_upgrade {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.headers_mut() = headers;
    response
}
