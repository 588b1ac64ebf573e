//! Protocol handler contract.

use async_trait::async_trait;
use axum::http::Response;
use bytes::Bytes;

use crate::error::{GatewayError, GatewayResult};
use crate::exchange::{Exchange, UpgradeState};
use crate::net::connection::Connection;

/// A parsed outbound destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    url: String,
    host: String,
    port: u16,
    path_and_query: String,
}

impl Destination {
    /// Parse an absolute `http://` destination URL.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let malformed = || GatewayError::MalformedUrl(raw.to_string());
        let url = url::Url::parse(raw).map_err(|_| malformed())?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(malformed)?;
        let port = url.port_or_known_default().ok_or_else(malformed)?;

        let mut path_and_query = url.path().to_string();
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok(Self {
            url: raw.to_string(),
            host: host.to_string(),
            port,
            path_and_query,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// `host[:port]` for the Host header; the default port is omitted.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// What a protocol handler hands back to the HTTP client stage.
#[derive(Debug)]
pub struct Upstream {
    pub response: Response<Bytes>,
    /// Connection to pool (when `reusable`) or to relay (when upgraded).
    pub connection: Option<Connection>,
    pub upgrade: UpgradeState,
    pub reusable: bool,
}

impl Upstream {
    /// A finished response whose connection may not be reused.
    pub fn closed(response: Response<Bytes>) -> Self {
        Self {
            response,
            connection: None,
            upgrade: UpgradeState::None,
            reusable: false,
        }
    }
}

/// Performs one outbound attempt for a given protocol.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Protocol name as requested in `Upgrade` (`websocket`, `tcp`, `h2c`).
    fn name(&self) -> &str;

    /// True if this handler serves `requested` and the exchange permits it.
    fn can_handle(&self, requested: &str, exchange: &Exchange) -> bool;

    /// Validate the request before anything is sent.
    fn check_upgrade_request(&self, _exchange: &Exchange) -> GatewayResult<()> {
        Ok(())
    }

    /// Send the request on `connection` and read the response.
    async fn handle(
        &self,
        exchange: &Exchange,
        connection: Connection,
        destination: &Destination,
    ) -> GatewayResult<Upstream>;

    /// True if a `101` response completes the protocol switch this handler asked for.
    fn check_upgrade_response(&self, _response: &Response<Bytes>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parts() {
        let dest = Destination::parse("http://example.org/foo?x=1").unwrap();
        assert_eq!(dest.host(), "example.org");
        assert_eq!(dest.port(), 80);
        assert_eq!(dest.path_and_query(), "/foo?x=1");
        assert_eq!(dest.authority(), "example.org");

        let dest = Destination::parse("http://10.0.0.1:8081").unwrap();
        assert_eq!(dest.path_and_query(), "/");
        assert_eq!(dest.authority(), "10.0.0.1:8081");
    }

    #[test]
    fn malformed_destinations() {
        for raw in ["not a url", "http://", "/relative"] {
            let err = Destination::parse(raw).unwrap_err();
            assert!(matches!(err, GatewayError::MalformedUrl(_)), "{}", raw);
        }
    }
}
