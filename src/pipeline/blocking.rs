//! Manual-release stage.
//!
//! Parks the exchange before forwarding and/or after the backend answered,
//! until an operator releases or stops it through the [`ExchangeStore`].

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::exchange::{Exchange, ExchangeStore};
use crate::pipeline::{Interceptor, Outcome};

pub struct BlockingInterceptor {
    store: ExchangeStore,
    on_request: bool,
    on_response: bool,
}

impl BlockingInterceptor {
    pub fn new(store: ExchangeStore, on_request: bool, on_response: bool) -> Self {
        Self {
            store,
            on_request,
            on_response,
        }
    }

    async fn park(&self, exchange: &Exchange, phase: &'static str) -> GatewayResult<()> {
        let id = exchange.id();
        let control = exchange.control().clone();
        self.store.register(id, control.clone());
        tracing::info!(exchange_id = %id, phase, "Exchange blocked awaiting release");

        let result = control.block().await;
        self.store.unregister(&id);

        match &result {
            Ok(()) => tracing::info!(exchange_id = %id, phase, "Exchange released"),
            Err(_) => tracing::info!(exchange_id = %id, phase, "Exchange stopped while blocked"),
        }
        result
    }
}

#[async_trait]
impl Interceptor for BlockingInterceptor {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        if self.on_request {
            self.park(exchange, "request").await?;
        }
        Ok(Outcome::Continue)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        if self.on_response {
            self.park(exchange, "response").await?;
        }
        Ok(Outcome::Continue)
    }

    async fn handle_abort(&self, exchange: &mut Exchange) -> GatewayResult<()> {
        self.store.unregister(&exchange.id());
        Ok(())
    }
}
