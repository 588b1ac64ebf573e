//! Request / response / abort passes over an interceptor chain.
//!
//! # State Machine
//! ```text
//! request pass (list order, each stage pushed when invoked)
//!     CONTINUE → next stage
//!     RETURN   → response pass over the stack
//!     ABORT    → abort pass over the stack
//!     Err      → ABORT, error recorded
//!
//! response pass (LIFO pop)
//!     CONTINUE / RETURN → next
//!     ABORT / Err       → abort pass (offending stage first)
//!     done              → Completed
//!
//! abort pass (LIFO pop, errors logged) → Failed
//! ```

use axum::http::StatusCode;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::exchange::{Exchange, ExchangeStatus};
use crate::http::response::error_response;
use crate::pipeline::{Interceptor, Outcome};

/// Drives an exchange through an interceptor chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineExecutor;

impl PipelineExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run the full pipeline and return the final status.
    pub async fn run(&self, exchange: &mut Exchange, chain: &[Arc<dyn Interceptor>]) -> ExchangeStatus {
        for interceptor in chain {
            if exchange.control().is_stopped() {
                exchange.set_error_message(GatewayError::Terminated.to_string());
                self.abort(exchange).await;
                return exchange.status();
            }

            exchange.push_interceptor(interceptor.clone());
            let outcome = match interceptor.handle_request(exchange).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        exchange_id = %exchange.id(),
                        interceptor = interceptor.name(),
                        error = %e,
                        "Interceptor failed during request"
                    );
                    exchange.set_error_message(e.to_string());
                    Outcome::Abort
                }
            };

            tracing::trace!(
                exchange_id = %exchange.id(),
                interceptor = interceptor.name(),
                outcome = %outcome,
                "Request handler finished"
            );

            match outcome {
                Outcome::Continue => continue,
                Outcome::Return => {
                    self.respond(exchange).await;
                    return exchange.status();
                }
                Outcome::Abort => {
                    self.abort(exchange).await;
                    return exchange.status();
                }
            }
        }

        if exchange.response().is_none() {
            exchange.set_error_message("no response produced");
            self.abort(exchange).await;
        } else {
            self.respond(exchange).await;
        }
        exchange.status()
    }

    /// Response pass: pop the stack and run response handlers.
    async fn respond(&self, exchange: &mut Exchange) {
        while let Some(interceptor) = exchange.pop_interceptor() {
            let failed = match interceptor.handle_response(exchange).await {
                Ok(Outcome::Continue) | Ok(Outcome::Return) => false,
                Ok(Outcome::Abort) => true,
                Err(e) => {
                    tracing::warn!(
                        exchange_id = %exchange.id(),
                        interceptor = interceptor.name(),
                        error = %e,
                        "Interceptor failed during response"
                    );
                    exchange.set_error_message(e.to_string());
                    true
                }
            };

            if failed {
                exchange.push_interceptor(interceptor);
                self.abort(exchange).await;
                return;
            }
        }
        exchange.set_status(ExchangeStatus::Completed);
    }

    /// Abort pass: notify every stacked interceptor, never raise.
    async fn abort(&self, exchange: &mut Exchange) {
        while let Some(interceptor) = exchange.pop_interceptor() {
            if let Err(e) = interceptor.handle_abort(exchange).await {
                tracing::warn!(
                    exchange_id = %exchange.id(),
                    interceptor = interceptor.name(),
                    error = %e,
                    "Error in abort handler ignored"
                );
            }
        }

        let keep = exchange
            .response()
            .map(|r| r.status().as_u16() >= 400)
            .unwrap_or(false);
        if !keep {
            exchange.set_response(error_response(StatusCode::INTERNAL_SERVER_ERROR));
        }

        tracing::debug!(
            exchange_id = %exchange.id(),
            error = exchange.error_message().unwrap_or("aborted"),
            "Exchange aborted"
        );
        exchange.set_status(ExchangeStatus::Failed);
    }
}
