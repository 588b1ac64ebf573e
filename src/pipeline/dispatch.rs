//! Target resolution stage.
//!
//! Runs after the rule's own interceptors. Leaves destinations set by an
//! earlier stage (the load balancer) untouched; otherwise derives one from
//! the rule's [`Target`].

use async_trait::async_trait;
use axum::http::{header, Method};

use crate::cluster::authority;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;
use crate::pipeline::{Interceptor, Outcome};
use crate::routing::Target;

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchInterceptor;

impl DispatchInterceptor {
    pub fn new() -> Self {
        Self
    }

    /// Compute the destination URL for a target, or `None` for dynamic targets.
    pub fn resolve(target: &Target, exchange: &Exchange) -> GatewayResult<Option<String>> {
        let request = exchange.request();
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let destination = match target {
            Target::Dynamic => return Ok(None),
            Target::Static { host, port } => {
                let authority = authority(host, *port);
                if request.method() == Method::CONNECT {
                    format!("http://{}", authority)
                } else {
                    format!("http://{}{}", authority, path_and_query)
                }
            }
            Target::FromRequest => {
                let uri = request.uri();
                if request.method() == Method::CONNECT {
                    let authority = uri
                        .authority()
                        .ok_or_else(|| GatewayError::MalformedUrl(uri.to_string()))?;
                    format!("http://{}", authority)
                } else if uri.scheme().is_some() && uri.authority().is_some() {
                    uri.to_string()
                } else {
                    let host = request
                        .headers()
                        .get(header::HOST)
                        .and_then(|h| h.to_str().ok())
                        .filter(|h| !h.is_empty())
                        .ok_or_else(|| GatewayError::MalformedUrl(path_and_query.to_string()))?;
                    format!("http://{}{}", host, path_and_query)
                }
            }
        };

        url::Url::parse(&destination).map_err(|_| GatewayError::MalformedUrl(destination.clone()))?;
        Ok(Some(destination))
    }
}

#[async_trait]
impl Interceptor for DispatchInterceptor {
    fn name(&self) -> &str {
        "dispatch"
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        if !exchange.destinations.is_empty() {
            return Ok(Outcome::Continue);
        }

        let rule = exchange
            .rule()
            .ok_or_else(|| GatewayError::Pipeline("exchange has no rule".into()))?;

        match Self::resolve(rule.target(), exchange)? {
            Some(destination) => {
                tracing::debug!(
                    exchange_id = %exchange.id(),
                    rule = %rule.name(),
                    destination = %destination,
                    "Destination resolved"
                );
                exchange.destinations.push(destination);
                Ok(Outcome::Continue)
            }
            None => Err(GatewayError::Config(format!(
                "rule '{}' has a dynamic target but no destination was set",
                rule.name()
            ))),
        }
    }
}
