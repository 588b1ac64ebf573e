//! Rule keys and request matching.
//!
//! # Responsibilities
//! - Compile host / method / path patterns once, at rule construction
//! - Match an inbound [`RequestKey`] structurally against a [`RuleKey`]
//! - Define rule identity (port + pattern texts)
//!
//! # Design Decisions
//! - Host matching is case-insensitive; the port part of the Host header is ignored
//! - Host patterns are space-separated globs (`*.example.com api.local`)
//! - Path patterns are anchored regular expressions, or literal prefixes
//! - `"*"` or empty means wildcard for host, method and path
//! - Invalid patterns fail at construction, never at match time

use axum::http::{header, Request};
use regex::{Regex, RegexBuilder};
use std::hash::{Hash, Hasher};

use crate::error::{GatewayError, GatewayResult};

/// The concrete routing-relevant facts of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    pub port: u16,
    pub host: String,
    pub method: String,
    pub path: String,
}

impl RequestKey {
    pub fn new(
        port: u16,
        host: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            port,
            host: host.into(),
            method: method.into(),
            path: path.into(),
        }
    }

    /// Build the key from a request received on `port`.
    pub fn from_request<B>(port: u16, req: &Request<B>) -> Self {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            port,
            host,
            method: req.method().as_str().to_string(),
            path: req.uri().path().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum HostPattern {
    Any,
    Globs(Vec<Regex>),
}

impl HostPattern {
    fn compile(source: &str) -> GatewayResult<Self> {
        let source = source.trim();
        if source.is_empty() || source == "*" {
            return Ok(HostPattern::Any);
        }
        let globs = source
            .split_whitespace()
            .map(|glob| {
                let pattern = format!("^{}$", regex::escape(glob).replace(r"\*", ".*"));
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        GatewayError::Config(format!("invalid host pattern '{}': {}", glob, e))
                    })
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(HostPattern::Globs(globs))
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Globs(globs) => {
                let host = strip_port(host);
                globs.iter().any(|g| g.is_match(host))
            }
        }
    }
}

/// Remove a trailing `:port` (IPv6 literals keep their brackets).
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        return &host[..=end];
    }
    match host.rfind(':') {
        Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..idx],
        _ => host,
    }
}

#[derive(Debug, Clone)]
enum PathPattern {
    Any,
    Prefix(String),
    Regex(Regex),
}

impl PathPattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Any => true,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Regex(re) => re.is_match(path),
        }
    }
}

/// Immutable match predicate of a rule.
#[derive(Debug, Clone)]
pub struct RuleKey {
    port: u16,
    host_source: String,
    method_source: String,
    path_source: String,
    path_is_regex: bool,
    host: HostPattern,
    path: PathPattern,
}

impl RuleKey {
    /// Key with a path regular expression matched against the whole path.
    pub fn new(port: u16, host: &str, method: &str, path_regex: &str) -> GatewayResult<Self> {
        let path = match path_regex.trim() {
            "" | "*" => PathPattern::Any,
            re => PathPattern::Regex(Regex::new(&format!("^(?:{})$", re)).map_err(|e| {
                GatewayError::Config(format!("invalid path pattern '{}': {}", re, e))
            })?),
        };
        Self::build(port, host, method, path_regex, true, path)
    }

    /// Key with a literal path prefix.
    pub fn with_path_prefix(port: u16, host: &str, method: &str, prefix: &str) -> GatewayResult<Self> {
        let path = match prefix.trim() {
            "" | "*" => PathPattern::Any,
            p => PathPattern::Prefix(p.to_string()),
        };
        Self::build(port, host, method, prefix, false, path)
    }

    /// Wildcard key for a port.
    pub fn any(port: u16) -> Self {
        Self {
            port,
            host_source: "*".into(),
            method_source: "*".into(),
            path_source: "*".into(),
            path_is_regex: true,
            host: HostPattern::Any,
            path: PathPattern::Any,
        }
    }

    fn build(
        port: u16,
        host: &str,
        method: &str,
        path_source: &str,
        path_is_regex: bool,
        path: PathPattern,
    ) -> GatewayResult<Self> {
        let method = method.trim();
        let method_source = if method.is_empty() { "*".to_string() } else { method.to_uppercase() };
        let host_source = host.trim().to_string();
        Ok(Self {
            port,
            host: HostPattern::compile(&host_source)?,
            host_source,
            method_source,
            path_source: path_source.trim().to_string(),
            path_is_regex,
            path,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &str {
        &self.host_source
    }

    pub fn method(&self) -> &str {
        &self.method_source
    }

    pub fn path(&self) -> &str {
        &self.path_source
    }

    /// Structural match: port exact, host/method/path by pattern.
    pub fn matches(&self, key: &RequestKey) -> bool {
        self.port == key.port
            && self.matches_method(&key.method)
            && self.host.matches(&key.host)
            && self.path.matches(&key.path)
    }

    fn matches_method(&self, method: &str) -> bool {
        self.method_source == "*" || self.method_source.eq_ignore_ascii_case(method)
    }
}

impl PartialEq for RuleKey {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
            && self.host_source.eq_ignore_ascii_case(&other.host_source)
            && self.method_source == other.method_source
            && self.path_source == other.path_source
            && self.path_is_regex == other.path_is_regex
    }
}

impl Eq for RuleKey {}

impl Hash for RuleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.port.hash(state);
        self.host_source.to_lowercase().hash(state);
        self.method_source.hash(state);
        self.path_source.hash(state);
        self.path_is_regex.hash(state);
    }
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            ":{} host={} method={} path={}",
            self.port, self.host_source, self.method_source, self.path_source
        )
    }
}
