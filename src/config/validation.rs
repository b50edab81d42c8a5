//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, DSNs and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    InvalidDsn { field: &'static str, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("listener.tls requires both cert_path and key_path")]
    IncompleteTls,
}

/// Check the whole configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::IncompleteTls);
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.proxy.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("proxy.connect_timeout_secs"));
    }
    if config.proxy.upstream_timeout_secs == 0 {
        errors.push(ValidationError::Zero("proxy.upstream_timeout_secs"));
    }
    if config.proxy.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("proxy.request_timeout_secs"));
    }

    check_dsn(&mut errors, "storage.dsn", &config.storage.dsn, &["memory"]);
    check_dsn(&mut errors, "definitions.dsn", &config.definitions.dsn, &["file", "memory"]);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_dsn(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    dsn: &str,
    schemes: &[&str],
) {
    match Url::parse(dsn) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::InvalidDsn {
            field,
            reason: format!("unsupported scheme {:?}", url.scheme()),
        }),
        Err(e) => errors.push(ValidationError::InvalidDsn {
            field,
            reason: e.to_string(),
        }),
    }
}
