//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0)
//! - Check endpoint syntax
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LbConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::LbConfig;
use crate::load_balancer::membership::parse_host_port;

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("pool.endpoints: invalid host:port {0:?}")]
    InvalidEndpoint(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("pool.ping must start with '/', got {0:?}")]
    InvalidPingPath(String),

    #[error("observability.metrics_address: invalid socket address {0:?}")]
    InvalidMetricsAddress(String),

    #[error("observability.log_level: unknown level {0:?}")]
    InvalidLogLevel(String),
}

/// Check every semantic constraint of `config`.
pub fn validate_config(config: &LbConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let pool = &config.pool;

    for endpoint in &pool.endpoints {
        if parse_host_port(endpoint).is_none() {
            errors.push(ValidationError::InvalidEndpoint(endpoint.clone()));
        }
    }

    let positive: [(&'static str, u64); 8] = [
        ("pool.max_pending", pool.max_pending),
        ("pool.max_sockets", pool.max_sockets as u64),
        ("pool.timeout_ms", pool.timeout_ms),
        ("pool.resolution_ms", pool.resolution_ms),
        ("pool.ping_timeout_ms", pool.ping_timeout_ms),
        ("pool.max_requests_per_connection", pool.max_requests_per_connection),
        ("pool.counter_ceiling", pool.counter_ceiling),
        ("pool.event_capacity", pool.event_capacity as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if pool.max_pool_size == Some(0) {
        errors.push(ValidationError::Zero { field: "pool.max_pool_size" });
    }

    if let Some(ping) = &pool.ping {
        if !ping.starts_with('/') {
            errors.push(ValidationError::InvalidPingPath(ping.clone()));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    let level = observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::InvalidLogLevel(observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
