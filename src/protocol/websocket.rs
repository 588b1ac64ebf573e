//! WebSocket upgrade handler.

use async_trait::async_trait;
use axum::http::{header, Response, StatusCode};
use bytes::Bytes;

use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::exchange::{props, Exchange, UpgradeState};
use crate::http::response::header_has_token;
use crate::net::connection::Connection;
use crate::protocol::handler::{Destination, ProtocolHandler, Upstream};
use crate::protocol::http1;

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketHandler;

impl WebSocketHandler {
    pub fn new() -> Self {
        Self
    }
}

/// Forward an upgrade request and classify the answer: a matching `101`
/// upgrades the exchange, any other `101` is a backend fault.
pub(crate) async fn forward_upgrade(
    handler: &dyn ProtocolHandler,
    exchange: &Exchange,
    connection: Connection,
    destination: &Destination,
) -> GatewayResult<Upstream> {
    let mut upstream = http1::forward(exchange, connection, destination, true).await?;
    if upstream.response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(upstream);
    }
    if !handler.check_upgrade_response(&upstream.response) {
        return Err(GatewayError::transport(
            FailureKind::Other,
            destination.as_str(),
            format!("backend switched to a protocol other than {}", handler.name()),
        ));
    }

    tracing::debug!(
        exchange_id = %exchange.id(),
        destination = %destination,
        protocol = handler.name(),
        "Protocol switched"
    );
    upstream.upgrade = UpgradeState::Protocol(handler.name().to_string());
    Ok(upstream)
}

pub(crate) fn upgrade_matches(response: &Response<Bytes>, protocol: &str) -> bool {
    response.status() == StatusCode::SWITCHING_PROTOCOLS
        && header_has_token(response.headers(), header::UPGRADE, protocol)
}

#[async_trait]
impl ProtocolHandler for WebSocketHandler {
    fn name(&self) -> &str {
        "websocket"
    }

    fn can_handle(&self, requested: &str, exchange: &Exchange) -> bool {
        requested.eq_ignore_ascii_case("websocket") && exchange.flag(props::ALLOW_WEBSOCKET)
    }

    fn check_upgrade_request(&self, exchange: &Exchange) -> GatewayResult<()> {
        let has_key = exchange
            .request()
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if has_key {
            Ok(())
        } else {
            Err(GatewayError::UpgradeDenied("websocket without Sec-WebSocket-Key".into()))
        }
    }

    async fn handle(
        &self,
        exchange: &Exchange,
        connection: Connection,
        destination: &Destination,
    ) -> GatewayResult<Upstream> {
        forward_upgrade(self, exchange, connection, destination).await
    }

    fn check_upgrade_response(&self, response: &Response<Bytes>) -> bool {
        upgrade_matches(response, "websocket")
    }
}
