//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick plain or JSON output from configuration
//! - Let `RUST_LOG` override the configured level
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging throughout the crate
//! - JSON format for production, plain format for development

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter from `RUST_LOG`, else from the configured level, else `info`.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns false when one was already installed.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
    });
    let plain_layer = (!config.json).then(|| fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(level = %config.log_level, json = config.json, "Logging initialized");
    }
    installed
}
