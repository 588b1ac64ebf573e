//! Handler selection per outbound attempt.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::exchange::{props, Exchange};
use crate::http::request::requested_upgrade;
use crate::protocol::handler::ProtocolHandler;
use crate::protocol::{Http1Handler, Http2Handler, TcpUpgradeHandler, WebSocketHandler};

/// Ordered upgrade handlers plus the HTTP/1.1 default.
pub struct ProtocolHandlerFactory {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
    default: Arc<dyn ProtocolHandler>,
}

impl ProtocolHandlerFactory {
    /// `h2c`, `websocket`, `tcp`, in that order.
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            handlers: vec![
                Arc::new(Http2Handler::new(read_timeout)),
                Arc::new(WebSocketHandler::new()),
                Arc::new(TcpUpgradeHandler::new()),
            ],
            default: Arc::new(Http1Handler::new()),
        }
    }

    /// Protocol the exchange asks for: `h2c` on rules forwarding with prior
    /// knowledge, otherwise the client's `Upgrade` header.
    pub fn requested_protocol(exchange: &Exchange) -> Option<String> {
        if exchange.flag(props::USE_H2C) {
            return Some("h2c".to_string());
        }
        requested_upgrade(exchange.request())
    }

    /// Pick the handler for `requested`. An unknown or unpermitted protocol
    /// is denied.
    pub fn handler_for(
        &self,
        exchange: &Exchange,
        requested: Option<&str>,
    ) -> GatewayResult<Arc<dyn ProtocolHandler>> {
        let Some(requested) = requested else {
            return Ok(self.default.clone());
        };
        self.handlers
            .iter()
            .find(|h| h.can_handle(requested, exchange))
            .cloned()
            .ok_or_else(|| GatewayError::UpgradeDenied(requested.to_string()))
    }
}

impl std::fmt::Debug for ProtocolHandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("ProtocolHandlerFactory")
            .field("handlers", &names)
            .field("default", &self.default.name())
            .finish()
    }
}
