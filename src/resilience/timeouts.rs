//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap outbound connect and read operations with a deadline
//! - Translate elapsed deadlines into classified transport errors
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A zero duration disables the deadline
//! - Timed-out attempts surface as 504 Gateway Timeout when not retried

use std::future::Future;
use std::time::Duration;

use crate::error::{FailureKind, GatewayError, GatewayResult};

/// Run an I/O operation on an established connection under the read timeout.
pub async fn with_read_timeout<T, F>(limit: Duration, destination: &str, fut: F) -> GatewayResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    run(limit, destination, FailureKind::ReadTimeout, fut).await
}

/// Run a connect under the connect timeout.
pub async fn with_connect_timeout<T, F>(limit: Duration, destination: &str, fut: F) -> GatewayResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    run(limit, destination, FailureKind::ConnectTimeout, fut).await
}

async fn run<T, F>(limit: Duration, destination: &str, on_elapsed: FailureKind, fut: F) -> GatewayResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let result = if limit.is_zero() {
        fut.await
    } else {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                return Err(GatewayError::transport(
                    on_elapsed,
                    destination,
                    format!("no progress within {:?}", limit),
                ))
            }
        }
    };

    result.map_err(|e| {
        let kind = match FailureKind::from_io(&e) {
            FailureKind::ReadTimeout => on_elapsed,
            kind => kind,
        };
        GatewayError::transport(kind, destination, e)
    })
}
