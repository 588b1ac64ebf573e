//! Outbound backend connections.
//!
//! # Responsibilities
//! - Resolve and connect with classified failures (unknown host, refused, timeout)
//! - Read into an owned buffer under the read timeout
//! - Hand the raw stream to the relay after an upgrade or CONNECT
//!
//! # Design Decisions
//! - One `Connection` is owned by one exchange at a time
//! - Bytes read past the current message stay in the buffer

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::resilience::timeouts::{with_connect_timeout, with_read_timeout};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An open TCP connection to a backend.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    buffer: BytesMut,
    host: String,
    port: u16,
    peer: SocketAddr,
    read_timeout: Duration,
    reused: bool,
}

impl Connection {
    /// Resolve `host` and connect to the first address that accepts.
    pub async fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> GatewayResult<Self> {
        let destination = format!("{}:{}", host, port);
        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');

        let addrs: Vec<SocketAddr> = with_connect_timeout(
            connect_timeout,
            &destination,
            tokio::net::lookup_host((lookup_host, port)),
        )
        .await
        .map_err(|e| match e.failure_kind() {
            Some(FailureKind::ConnectTimeout) => e,
            _ => GatewayError::transport(FailureKind::UnknownHost, &destination, e),
        })?
        .collect();

        if addrs.is_empty() {
            return Err(GatewayError::transport(
                FailureKind::UnknownHost,
                &destination,
                "no addresses resolved",
            ));
        }

        let mut last_error = None;
        for addr in addrs {
            match with_connect_timeout(connect_timeout, &destination, TcpStream::connect(addr)).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let id = ConnectionId::new();
                    tracing::debug!(connection_id = %id, destination = %destination, peer = %addr, "Backend connection opened");
                    return Ok(Self {
                        id,
                        stream,
                        buffer: BytesMut::with_capacity(8 * 1024),
                        host: host.to_string(),
                        port,
                        peer: addr,
                        read_timeout,
                        reused: false,
                    });
                }
                Err(e) => {
                    tracing::debug!(destination = %destination, peer = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::transport(FailureKind::ConnectionRefused, &destination, "no address accepted")
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Pool key: `host:port`.
    pub fn key(&self) -> String {
        pool_key(&self.host, self.port)
    }

    /// True if this connection came from the pool.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Bytes read but not yet consumed.
    pub fn buffer(&self) -> &BytesMut {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Write all bytes to the backend.
    pub async fn write_all(&mut self, bytes: &[u8]) -> GatewayResult<()> {
        let destination = self.key();
        with_read_timeout(self.read_timeout, &destination, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await
    }

    /// Read more bytes into the buffer. Returns 0 at end of stream.
    pub async fn read_more(&mut self) -> GatewayResult<usize> {
        let destination = self.key();
        if self.buffer.capacity() - self.buffer.len() < 4096 {
            self.buffer.reserve(8 * 1024);
        }
        with_read_timeout(self.read_timeout, &destination, self.stream.read_buf(&mut self.buffer)).await
    }

    /// Close the write half (HTTP/1.0 request end).
    pub async fn shutdown_write(&mut self) -> GatewayResult<()> {
        self.stream.shutdown().await.map_err(GatewayError::from)
    }

    /// Split into the raw stream and any bytes already read ahead.
    pub fn into_parts(self) -> (TcpStream, Bytes) {
        (self.stream, self.buffer.freeze())
    }
}

/// Pool key for a backend.
pub fn pool_key(host: &str, port: u16) -> String {
    format!("{}:{}", host.to_ascii_lowercase(), port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn refused_connect_is_classified() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::open("127.0.0.1", port, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn unknown_host_is_classified() {
        let err = Connection::open(
            "no-such-host.invalid",
            80,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.failure_kind(),
            Some(FailureKind::UnknownHost) | Some(FailureKind::ConnectTimeout)
        ));
    }

    #[tokio::test]
    async fn read_timeout_is_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut conn = Connection::open("127.0.0.1", port, Duration::from_secs(1), Duration::from_millis(50))
            .await
            .unwrap();
        let err = conn.read_more().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::ReadTimeout));
    }

    #[tokio::test]
    async fn reads_accumulate_in_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let mut conn = Connection::open("localhost", port, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        while conn.buffer().len() < 5 {
            assert!(conn.read_more().await.unwrap() > 0);
        }
        assert_eq!(&conn.buffer()[..], b"hello");
        assert_eq!(conn.key(), format!("localhost:{}", port));
    }
}
