//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (rule names, cluster node addresses)
//! - Validate value ranges and patterns (ports, regexes, header names)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::{HeaderName, Method};
use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::builder::parse_node;
use crate::config::schema::{GatewayConfig, RuleConfig, SessionConfig, TargetConfig};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_host.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_host", "must not be empty"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    let mut names = HashSet::new();
    for (i, rule) in config.rules.iter().enumerate() {
        let field = format!("rules[{}]", i);
        if !rule.name.is_empty() && !names.insert(rule.name.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate rule name '{}'", rule.name)));
        }
        validate_rule(&field, rule, &mut errors);
    }

    let mut clusters = HashSet::new();
    for (i, cluster) in config.clusters.iter().enumerate() {
        let field = format!("clusters[{}]", i);
        if cluster.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !clusters.insert(cluster.name.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate cluster '{}'", cluster.name)));
        }
        for node in &cluster.nodes {
            if parse_node(node).is_err() {
                errors.push(ValidationError::new(
                    format!("{}.nodes", field),
                    format!("'{}' is not host:port", node),
                ));
            }
        }
    }

    let manager = &config.cluster_manager;
    if manager.validate_signature && manager.secret.is_empty() {
        errors.push(ValidationError::new(
            "cluster_manager.secret",
            "required when validate_signature is set",
        ));
    }

    let retries = &config.retries;
    if retries.backoff_multiplier < 1.0 || !retries.backoff_multiplier.is_finite() {
        errors.push(ValidationError::new("retries.backoff_multiplier", "must be at least 1.0"));
    }
    if retries.max_delay_ms < retries.delay_ms {
        errors.push(ValidationError::new("retries.max_delay_ms", "must not be below delay_ms"));
    }
    for method in &retries.mutating_methods {
        if Method::from_bytes(method.trim().as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "retries.mutating_methods",
                format!("invalid method '{}'", method),
            ));
        }
    }

    let health = &config.health;
    if health.enabled {
        if health.failure_threshold == 0 {
            errors.push(ValidationError::new("health.failure_threshold", "must be greater than 0"));
        }
        if health.check_interval_secs == 0 {
            errors.push(ValidationError::new("health.check_interval_secs", "must be greater than 0"));
        }
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rule(field: &str, rule: &RuleConfig, errors: &mut Vec<ValidationError>) {
    if rule.name.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
    }
    if rule.port == 0 {
        errors.push(ValidationError::new(format!("{}.port", field), "must be greater than 0"));
    }
    let method = rule.method.trim();
    if method != "*" && !method.is_empty() && Method::from_bytes(method.as_bytes()).is_err() {
        errors.push(ValidationError::new(format!("{}.method", field), format!("invalid method '{}'", method)));
    }

    match (&rule.path, &rule.path_prefix) {
        (Some(_), Some(_)) => errors.push(ValidationError::new(
            format!("{}.path", field),
            "path and path_prefix are mutually exclusive",
        )),
        (Some(path), None) if path.trim() != "*" => {
            if let Err(e) = Regex::new(&format!("^(?:{})$", path)) {
                errors.push(ValidationError::new(format!("{}.path", field), format!("invalid regex: {}", e)));
            }
        }
        _ => {}
    }

    if rule.use_h2c && !rule.allow_h2c {
        errors.push(ValidationError::new(format!("{}.use_h2c", field), "requires allow_h2c"));
    }

    let target = format!("{}.target", field);
    match &rule.target {
        TargetConfig::Static { host, port } => {
            if host.trim().is_empty() {
                errors.push(ValidationError::new(&target, "static host must not be empty"));
            }
            if *port == 0 {
                errors.push(ValidationError::new(&target, "static port must be greater than 0"));
            }
        }
        TargetConfig::Cluster { cluster, session, .. } => {
            if cluster.trim().is_empty() {
                errors.push(ValidationError::new(&target, "cluster name must not be empty"));
            }
            match session {
                Some(SessionConfig::Header { name }) | Some(SessionConfig::Cookie { name }) if name.trim().is_empty() => {
                    errors.push(ValidationError::new(&target, "session name must not be empty"));
                }
                Some(SessionConfig::Header { name }) if HeaderName::from_bytes(name.as_bytes()).is_err() => {
                    errors.push(ValidationError::new(&target, format!("invalid session header '{}'", name)));
                }
                Some(SessionConfig::Body { pattern }) => match Regex::new(pattern) {
                    Ok(re) if re.captures_len() < 2 => {
                        errors.push(ValidationError::new(&target, "session pattern needs a capture group"));
                    }
                    Err(e) => {
                        errors.push(ValidationError::new(&target, format!("invalid session pattern: {}", e)));
                    }
                    Ok(_) => {}
                },
                _ => {}
            }
        }
        TargetConfig::FromRequest | TargetConfig::ClusterNotification => {}
    }
}
