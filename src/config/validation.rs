//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parseable)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_listen_address(&config.listener.bind_address) {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not host:port or :port", config.listener.bind_address),
        ));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    if config.shutdown.timeout_secs == 0 {
        errors.push(ValidationError::new("shutdown.timeout_secs", "must be greater than 0"));
    }

    if let Some(socket) = &config.socket {
        if !socket.keepalive && socket.keepalive_interval_secs > 0 {
            errors.push(ValidationError::new(
                "socket.keepalive_interval_secs",
                "set but keepalive is disabled",
            ));
        }
    }

    if config.diagnostics.enabled && !config.diagnostics.root.starts_with('/') {
        errors.push(ValidationError::new("diagnostics.root", "must start with '/'"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Empty, `:port`, or `host:port` with a numeric (or `http`/`https`) port.
fn is_listen_address(addr: &str) -> bool {
    if addr.is_empty() {
        return true;
    }
    match addr.rsplit_once(':') {
        Some((_, port)) => matches!(port, "http" | "https") || port.parse::<u16>().is_ok(),
        None => false,
    }
}
