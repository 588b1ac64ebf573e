//! Retry logic.
//!
//! # Responsibilities
//! - Rotate through the destinations of an exchange, one per attempt
//! - Classify failures and decide whether another attempt is safe
//! - Sleep between attempts on a single destination
//! - Publish every attempt to health listeners and optionally record failures
//!
//! # Design Decisions
//! - Attempt `n` goes to `destinations[n % len]`
//! - A mutating method is not replayed on a single destination once bytes
//!   may have reached it (read timeout, reset, no response)
//! - Refused connections and unknown hosts are only retried when another
//!   destination exists
//! - 5xx and 408 are retried only with `failover_on_5xx`
//! - Configuration, upgrade-denied and termination errors are never retried

use axum::http::{Method, Response, StatusCode};
use std::future::Future;

use crate::config::RetryConfig;
use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::exchange::ExchangeId;
use crate::health::events::{AttemptBroadcaster, AttemptEvent, AttemptOutcome};
use crate::resilience::backoff::calculate_backoff;

/// Anything an attempt can return that carries a status code.
pub trait AttemptResponse {
    fn status_code(&self) -> StatusCode;
}

impl<B> AttemptResponse for Response<B> {
    fn status_code(&self) -> StatusCode {
        self.status()
    }
}

/// A failed attempt, recorded on the exchange when tracking is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub destination: String,
    pub kind: Option<FailureKind>,
    pub message: String,
}

/// Inputs of one `execute` call.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub exchange: ExchangeId,
    pub method: &'a Method,
    pub destinations: &'a [String],
}

/// Result of `execute`: the final outcome plus bookkeeping.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: GatewayResult<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Destination of the last attempt.
    pub destination: Option<String>,
    /// Failed attempts (empty unless tracking is enabled).
    pub failures: Vec<AttemptFailure>,
}

/// Bounded retry with failover across destinations.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    mutating: Vec<Method>,
    events: AttemptBroadcaster,
}

impl RetryHandler {
    pub fn new(config: RetryConfig, events: AttemptBroadcaster) -> Self {
        let mutating = config
            .mutating_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.trim().to_uppercase().as_bytes()).ok())
            .collect();
        Self {
            config,
            mutating,
            events,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn events(&self) -> &AttemptBroadcaster {
        &self.events
    }

    pub fn is_mutating(&self, method: &Method) -> bool {
        self.mutating.contains(method)
    }

    /// Whether a response status triggers another attempt.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.config.failover_on_5xx
            && (status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT)
    }

    /// Whether a failed attempt may be followed by another one.
    pub fn should_retry(&self, error: &GatewayError, method: &Method, destinations: usize) -> bool {
        let several = destinations > 1;
        match error.failure_kind() {
            None | Some(FailureKind::MalformedUrl) => false,
            Some(FailureKind::ConnectionRefused) | Some(FailureKind::UnknownHost) => several,
            Some(FailureKind::ReadTimeout) | Some(FailureKind::Reset) | Some(FailureKind::NoResponse) => {
                several || !self.is_mutating(method)
            }
            Some(FailureKind::ConnectTimeout) | Some(FailureKind::Other) => true,
        }
    }

    /// Run `attempt_fn(destination, attempt)` until it succeeds, a failure is
    /// not retryable, or `max_retries + 1` attempts were made.
    pub async fn execute<T, F, Fut>(&self, ctx: RetryContext<'_>, mut attempt_fn: F) -> RetryResult<T>
    where
        T: AttemptResponse,
        F: FnMut(String, u32) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let count = ctx.destinations.len();
        let mut failures = Vec::new();
        if count == 0 {
            return RetryResult {
                result: Err(GatewayError::Config("no destination to forward to".into())),
                attempts: 0,
                destination: None,
                failures,
            };
        }

        let max_retries = self.config.max_retries;
        let mut last: Option<GatewayResult<T>> = None;
        let mut destination = String::new();
        let mut attempts = 0;

        for attempt in 0..=max_retries {
            destination = ctx.destinations[attempt as usize % count].clone();
            attempts = attempt + 1;

            match attempt_fn(destination.clone(), attempt).await {
                Ok(response) => {
                    let status = response.status_code();
                    let retryable = self.is_retryable_status(status);
                    self.publish(&ctx, &destination, attempt, if retryable {
                        AttemptOutcome::ServerError { status: status.as_u16() }
                    } else {
                        AttemptOutcome::Succeeded { status: status.as_u16() }
                    });

                    if !retryable || attempt == max_retries {
                        return RetryResult {
                            result: Ok(response),
                            attempts,
                            destination: Some(destination),
                            failures,
                        };
                    }

                    tracing::info!(
                        exchange_id = %ctx.exchange,
                        destination = %destination,
                        attempt,
                        status = status.as_u16(),
                        "Retryable status from backend"
                    );
                    if self.config.track_node_failures {
                        failures.push(AttemptFailure {
                            attempt,
                            destination: destination.clone(),
                            kind: None,
                            message: format!("status {}", status.as_u16()),
                        });
                    }
                    last = Some(Ok(response));
                }
                Err(error) => {
                    if let Some(kind) = error.failure_kind().filter(|k| *k != FailureKind::MalformedUrl) {
                        self.publish(&ctx, &destination, attempt, AttemptOutcome::Failed { kind });
                    }
                    if self.config.track_node_failures {
                        failures.push(AttemptFailure {
                            attempt,
                            destination: destination.clone(),
                            kind: error.failure_kind(),
                            message: error.to_string(),
                        });
                    }

                    if !self.should_retry(&error, ctx.method, count) {
                        tracing::warn!(
                            exchange_id = %ctx.exchange,
                            destination = %destination,
                            attempt,
                            error = %error,
                            "Attempt failed, not retrying"
                        );
                        return RetryResult {
                            result: Err(error),
                            attempts,
                            destination: Some(destination),
                            failures,
                        };
                    }

                    tracing::warn!(
                        exchange_id = %ctx.exchange,
                        destination = %destination,
                        attempt,
                        error = %error,
                        "Attempt failed"
                    );
                    last = Some(Err(error));
                }
            }

            if attempt < max_retries && count == 1 {
                let delay = calculate_backoff(
                    attempt,
                    self.config.delay_ms,
                    self.config.backoff_multiplier,
                    self.config.max_delay_ms,
                    self.config.jitter,
                );
                tracing::debug!(exchange_id = %ctx.exchange, attempt, delay = ?delay, "Retrying after delay");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(exchange_id = %ctx.exchange, attempts, "Retries exhausted");
        RetryResult {
            result: last.unwrap_or_else(|| Err(GatewayError::Pipeline("no attempt made".into()))),
            attempts,
            destination: Some(destination),
            failures,
        }
    }

    fn publish(&self, ctx: &RetryContext<'_>, destination: &str, attempt: u32, outcome: AttemptOutcome) {
        self.events.publish(&AttemptEvent {
            exchange: ctx.exchange,
            destination: destination.to_string(),
            attempt,
            outcome,
        });
    }
}
