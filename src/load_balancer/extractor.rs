//! Session id extraction for sticky dispatch.

use axum::http::{header, HeaderMap, HeaderName};
use regex::Regex;

use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;

/// Which message of the exchange to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

/// Pulls a session id out of a request or response.
pub trait SessionIdExtractor: Send + Sync {
    fn extract(&self, exchange: &Exchange, phase: Phase) -> Option<String>;
}

fn headers(exchange: &Exchange, phase: Phase) -> Option<&HeaderMap> {
    match phase {
        Phase::Request => Some(exchange.request().headers()),
        Phase::Response => exchange.response().map(|r| r.headers()),
    }
}

/// Session id carried in a plain header.
#[derive(Debug, Clone)]
pub struct HeaderSessionIdExtractor {
    name: HeaderName,
}

impl HeaderSessionIdExtractor {
    pub fn new(name: &str) -> GatewayResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GatewayError::Config(format!("invalid session header '{}'", name)))?;
        Ok(Self { name })
    }
}

impl SessionIdExtractor for HeaderSessionIdExtractor {
    fn extract(&self, exchange: &Exchange, phase: Phase) -> Option<String> {
        headers(exchange, phase)?
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    }
}

/// Session id carried in a cookie: `Cookie` on requests, `Set-Cookie` on responses.
#[derive(Debug, Clone)]
pub struct CookieSessionIdExtractor {
    name: String,
}

impl CookieSessionIdExtractor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn find<'a>(&self, pairs: impl Iterator<Item = &'a str>) -> Option<String> {
        pairs
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| k.trim() == self.name)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    }
}

impl SessionIdExtractor for CookieSessionIdExtractor {
    fn extract(&self, exchange: &Exchange, phase: Phase) -> Option<String> {
        let headers = headers(exchange, phase)?;
        match phase {
            Phase::Request => headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(|v| self.find(v.split(';'))),
            // Only the name=value part of each Set-Cookie counts, not its attributes.
            Phase::Response => headers
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(|v| self.find(v.split(';').take(1))),
        }
    }
}

/// Session id found in the message body by a regex with one capture group.
#[derive(Debug, Clone)]
pub struct BodyPatternSessionIdExtractor {
    pattern: Regex,
}

impl BodyPatternSessionIdExtractor {
    pub fn new(pattern: &str) -> GatewayResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| GatewayError::Config(format!("invalid session pattern '{}': {}", pattern, e)))?;
        if pattern.captures_len() < 2 {
            return Err(GatewayError::Config(format!(
                "session pattern '{}' needs a capture group",
                pattern
            )));
        }
        Ok(Self { pattern })
    }
}

impl SessionIdExtractor for BodyPatternSessionIdExtractor {
    fn extract(&self, exchange: &Exchange, phase: Phase) -> Option<String> {
        let body = match phase {
            Phase::Request => exchange.request().body(),
            Phase::Response => exchange.response()?.body(),
        };
        let text = String::from_utf8_lossy(body);
        self.pattern
            .captures(&text)?
            .get(1)
            .map(|m| m.as_str().to_string())
            .filter(|v| !v.is_empty())
    }
}
