//! Raw TCP upgrade handler (`Upgrade: tcp`).

use async_trait::async_trait;
use axum::http::Response;
use bytes::Bytes;

use crate::error::GatewayResult;
use crate::exchange::{props, Exchange};
use crate::net::connection::Connection;
use crate::protocol::handler::{Destination, ProtocolHandler, Upstream};
use crate::protocol::websocket::{forward_upgrade, upgrade_matches};

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpUpgradeHandler;

impl TcpUpgradeHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolHandler for TcpUpgradeHandler {
    fn name(&self) -> &str {
        "tcp"
    }

    fn can_handle(&self, requested: &str, exchange: &Exchange) -> bool {
        requested.eq_ignore_ascii_case("tcp") && exchange.flag(props::ALLOW_TCP)
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
        upgrade_matches(response, "tcp")
    }
}
