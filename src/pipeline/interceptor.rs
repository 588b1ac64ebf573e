//! Pipeline stage contract.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::exchange::Exchange;

/// Control signal returned by a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed with the next stage.
    Continue,
    /// A response is set; unwind through the stages that already ran.
    Return,
    /// Stop and notify every stage that already ran.
    Abort,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Continue => f.write_str("CONTINUE"),
            Outcome::Return => f.write_str("RETURN"),
            Outcome::Abort => f.write_str("ABORT"),
        }
    }
}

/// A pipeline stage.
///
/// `handle_response` runs only if `handle_request` ran for the same exchange;
/// `handle_abort` likewise. An `Err` from `handle_request` or
/// `handle_response` is treated as [`Outcome::Abort`].
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle_request(&self, _exchange: &mut Exchange) -> GatewayResult<Outcome> {
        Ok(Outcome::Continue)
    }

    async fn handle_response(&self, _exchange: &mut Exchange) -> GatewayResult<Outcome> {
        Ok(Outcome::Continue)
    }

    /// Best effort; errors are logged by the executor.
    async fn handle_abort(&self, _exchange: &mut Exchange) -> GatewayResult<()> {
        Ok(())
    }
}
