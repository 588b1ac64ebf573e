//! HTTP/2 cleartext (prior knowledge) handler.
//!
//! Framing is left to hyper's HTTP/2 client; this handler only adapts the
//! buffered exchange request and collects the response body.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderName, Request, Response, Uri};
use bytes::Bytes;
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::error::{FailureKind, GatewayError, GatewayResult};
use crate::exchange::{props, Exchange};
use crate::http::response::strip_hop_by_hop;
use crate::net::connection::Connection;
use crate::protocol::handler::{Destination, ProtocolHandler, Upstream};
use crate::protocol::wire::MAX_RESPONSE_BODY_BYTES;
use crate::resilience::timeouts::with_read_timeout;

#[derive(Debug, Clone, Copy)]
pub struct Http2Handler {
    read_timeout: std::time::Duration,
}

impl Http2Handler {
    pub fn new(read_timeout: std::time::Duration) -> Self {
        Self { read_timeout }
    }

    fn outbound(exchange: &Exchange, destination: &Destination) -> GatewayResult<Request<Body>> {
        let source = exchange.request();
        let uri: Uri = format!(
            "http://{}{}",
            destination.authority(),
            destination.path_and_query()
        )
        .parse()
        .map_err(|_| GatewayError::MalformedUrl(destination.to_string()))?;

        let mut headers = source.headers().clone();
        strip_hop_by_hop(&mut headers, false);
        headers.remove(HeaderName::from_static("http2-settings"));
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let mut request = Request::new(Body::from(source.body().clone()));
        *request.method_mut() = source.method().clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

#[async_trait]
impl ProtocolHandler for Http2Handler {
    fn name(&self) -> &str {
        "h2c"
    }

    fn can_handle(&self, requested: &str, exchange: &Exchange) -> bool {
        requested.eq_ignore_ascii_case("h2c")
            && (exchange.flag(props::ALLOW_H2C) || exchange.flag(props::USE_H2C))
    }

    async fn handle(
        &self,
        exchange: &Exchange,
        connection: Connection,
        destination: &Destination,
    ) -> GatewayResult<Upstream> {
        let request = Self::outbound(exchange, destination)?;
        let target = destination.as_str();
        let (stream, _) = connection.into_parts();

        let (mut sender, conn) = with_read_timeout(self.read_timeout, target, async {
            hyper::client::conn::http2::handshake::<_, _, Body>(TokioExecutor::new(), TokioIo::new(stream))
                .await
                .map_err(std::io::Error::other)
        })
        .await?;

        let exchange_id = exchange.id();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(exchange_id = %exchange_id, error = %e, "HTTP/2 connection closed with error");
            }
        });

        let response = with_read_timeout(self.read_timeout, target, async {
            sender.send_request(request).await.map_err(std::io::Error::other)
        })
        .await?;

        let (parts, incoming) = response.into_parts();
        let body = with_read_timeout(self.read_timeout, target, async {
            axum::body::to_bytes(Body::new(incoming), MAX_RESPONSE_BODY_BYTES)
                .await
                .map_err(std::io::Error::other)
        })
        .await
        .map_err(|e| match e {
            GatewayError::Transport { kind: FailureKind::ReadTimeout, .. } => e,
            other => GatewayError::transport(FailureKind::Reset, target, other),
        })?;

        let mut response = Response::from_parts(parts, body);
        *response.version_mut() = axum::http::Version::HTTP_11;
        strip_hop_by_hop(response.headers_mut(), false);
        let length = response.body().len();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, length.into());

        tracing::debug!(
            exchange_id = %exchange.id(),
            destination = %destination,
            status = response.status().as_u16(),
            "HTTP/2 response received"
        );
        Ok(Upstream::closed(response))
    }
}
