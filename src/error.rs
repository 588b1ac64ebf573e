//! Gateway error taxonomy.
//!
//! # Categories
//! - Configuration: bad rule patterns, malformed destination URLs (never retried)
//! - Transport: classified network failures consumed by the retry handler
//! - Protocol negotiation: upgrade not permitted (client error, never retried)
//! - Pipeline: interceptor failures, forced stops
//!
//! Routing misses (no rule, no node) are not errors; they produce responses.

use axum::http::StatusCode;
use thiserror::Error;

/// Classification of a failed outbound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Target URL could not be parsed.
    MalformedUrl,
    /// TCP connect was actively refused.
    ConnectionRefused,
    /// Host name did not resolve.
    UnknownHost,
    /// TCP connect did not complete in time.
    ConnectTimeout,
    /// No data arrived within the read timeout.
    ReadTimeout,
    /// Socket reset or aborted by the peer.
    Reset,
    /// Stream ended before a status line was read.
    NoResponse,
    /// Anything else on the wire (protocol violations, write errors).
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MalformedUrl => "malformed_url",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::UnknownHost => "unknown_host",
            FailureKind::ConnectTimeout => "connect_timeout",
            FailureKind::ReadTimeout => "read_timeout",
            FailureKind::Reset => "reset",
            FailureKind::NoResponse => "no_response",
            FailureKind::Other => "other",
        }
    }

    /// Map an I/O error raised on an established connection.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::ReadTimeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => FailureKind::Reset,
            ErrorKind::UnexpectedEof => FailureKind::NoResponse,
            _ => FailureKind::Other,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the routing and dispatch engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration (rule patterns, missing targets).
    #[error("configuration error: {0}")]
    Config(String),

    /// Destination URL could not be parsed.
    #[error("malformed destination URL '{0}'")]
    MalformedUrl(String),

    /// Outbound network failure.
    #[error("{kind} while talking to {destination}: {message}")]
    Transport {
        kind: FailureKind,
        destination: String,
        message: String,
    },

    /// Requested protocol upgrade is not allowed for this exchange.
    #[error("protocol upgrade to '{0}' denied")]
    UpgradeDenied(String),

    /// Exchange was force-stopped while in flight.
    #[error("exchange terminated")]
    Terminated,

    /// Interceptor failure.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Listening port could not be opened.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn transport(
        kind: FailureKind,
        destination: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        GatewayError::Transport {
            kind,
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    /// Failure classification used by the retry handler.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            GatewayError::Transport { kind, .. } => Some(*kind),
            GatewayError::MalformedUrl(_) => Some(FailureKind::MalformedUrl),
            _ => None,
        }
    }

    /// Status code presented to the client when this error ends an exchange.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Transport { kind, .. } => match kind {
                FailureKind::ConnectTimeout | FailureKind::ReadTimeout => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                FailureKind::MalformedUrl => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            },
            GatewayError::UpgradeDenied(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
