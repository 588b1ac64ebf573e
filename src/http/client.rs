//! Terminal pipeline stage: the outbound HTTP client.
//!
//! # Data Flow
//! ```text
//! exchange.destinations
//!     → factory picks a protocol handler (denied upgrade → 403, no attempt)
//!     → RetryHandler::execute, per attempt:
//!         → pooled connection (stale → reconnect once) or Connection::open;
//!           mutating methods always open a fresh connection
//!         → handler.handle → Upstream
//!     → response on the exchange; connection pooled, relayed, or dropped
//! ```

use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::TimeoutConfig;
use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::exchange::{Exchange, ExchangeStatus, UpgradeState};
use crate::http::response::error_response;
use crate::net::{Connection, ConnectionPool};
use crate::pipeline::{Interceptor, Outcome};
use crate::protocol::{Destination, ProtocolHandler, ProtocolHandlerFactory, Upstream};
use crate::resilience::{AttemptResponse, RetryContext, RetryHandler};

impl AttemptResponse for Upstream {
    fn status_code(&self) -> StatusCode {
        self.response.status()
    }
}

pub struct HttpClientInterceptor {
    retries: RetryHandler,
    protocols: ProtocolHandlerFactory,
    pool: Arc<ConnectionPool>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClientInterceptor {
    pub fn new(retries: RetryHandler, pool: Arc<ConnectionPool>, timeouts: &TimeoutConfig) -> Self {
        let read_timeout = Duration::from_millis(timeouts.read_ms);
        Self {
            retries,
            protocols: ProtocolHandlerFactory::new(read_timeout),
            pool,
            connect_timeout: Duration::from_millis(timeouts.connect_ms),
            read_timeout,
        }
    }

    pub fn retries(&self) -> &RetryHandler {
        &self.retries
    }

    async fn attempt(
        &self,
        exchange: &Exchange,
        handler: &Arc<dyn ProtocolHandler>,
        raw: String,
        reuse_pooled: bool,
    ) -> GatewayResult<Upstream> {
        let destination = Destination::parse(&raw)?;

        if reuse_pooled {
            if let Some(conn) = self
                .pool
                .acquire(destination.host(), destination.port(), self.read_timeout)
            {
                match handler.handle(exchange, conn, &destination).await {
                    Err(e)
                        if matches!(
                            e.failure_kind(),
                            Some(FailureKind::Reset) | Some(FailureKind::NoResponse)
                        ) =>
                    {
                        tracing::debug!(
                            exchange_id = %exchange.id(),
                            destination = %destination,
                            "Pooled connection went stale, reconnecting"
                        );
                    }
                    other => return other,
                }
            }
        }

        let conn = Connection::open(
            destination.host(),
            destination.port(),
            self.connect_timeout,
            self.read_timeout,
        )
        .await?;
        handler.handle(exchange, conn, &destination).await
    }

    fn fail(exchange: &mut Exchange, error: &GatewayError) -> Outcome {
        exchange.set_error_message(error.to_string());
        exchange.set_response(error_response(error.status_code()));
        Outcome::Abort
    }
}

#[async_trait]
impl Interceptor for HttpClientInterceptor {
    fn name(&self) -> &str {
        "http-client"
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        let requested = ProtocolHandlerFactory::requested_protocol(exchange);
        let handler = match self
            .protocols
            .handler_for(exchange, requested.as_deref())
            .and_then(|h| h.check_upgrade_request(exchange).map(|_| h))
        {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!(exchange_id = %exchange.id(), error = %e, "Upgrade rejected");
                return Ok(Self::fail(exchange, &e));
            }
        };

        let destinations = exchange.destinations.clone();
        let method = exchange.request().method().clone();
        // Upgrades and tunnels always get a dedicated connection.
        let poolable = requested.is_none() && method != axum::http::Method::CONNECT;
        // Stale pooled connections are resent silently; mutating methods never use them.
        let reuse_pooled = poolable && !self.retries.is_mutating(&method);
        exchange.timestamps.request_sent = Some(SystemTime::now());

        let outcome = {
            let exc: &Exchange = exchange;
            let ctx = RetryContext {
                exchange: exc.id(),
                method: &method,
                destinations: &destinations,
            };
            self.retries
                .execute(ctx, |destination, _attempt| {
                    let handler = handler.clone();
                    async move { self.attempt(exc, &handler, destination, reuse_pooled).await }
                })
                .await
        };

        exchange.set_node_failures(outcome.failures);
        let destination = outcome.destination.unwrap_or_default();

        match outcome.result {
            Ok(upstream) => {
                exchange.timestamps.response_received = Some(SystemTime::now());
                exchange.set_status(ExchangeStatus::Received);

                let Upstream {
                    response,
                    connection,
                    upgrade,
                    reusable,
                } = upstream;
                match (upgrade, connection) {
                    (UpgradeState::None, Some(conn)) if reusable => self.pool.release(conn),
                    (UpgradeState::None, _) => {}
                    (state, Some(conn)) => exchange.set_upgraded(state, conn),
                    (_, None) => {}
                }

                tracing::debug!(
                    exchange_id = %exchange.id(),
                    destination = %destination,
                    attempts = outcome.attempts,
                    status = response.status().as_u16(),
                    "Backend response received"
                );
                exchange.set_response(response);
                Ok(Outcome::Return)
            }
            Err(e) => {
                tracing::warn!(
                    exchange_id = %exchange.id(),
                    destination = %destination,
                    attempts = outcome.attempts,
                    error = %e,
                    "Forwarding failed"
                );
                Ok(Self::fail(exchange, &e))
            }
        }
    }
}
