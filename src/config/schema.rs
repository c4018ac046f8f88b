//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pool.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LbConfig {
    /// Pool membership and request behavior.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Label used in log messages and metric names.
    pub name: Option<String>,

    /// Backend addresses as `host:port`.
    pub endpoints: Vec<String>,

    /// Pool-wide pending request limit.
    pub max_pending: u64,

    /// Concurrent connections in use per endpoint.
    pub max_sockets: usize,

    /// Cap on active endpoints; unset activates every address.
    pub max_pool_size: Option<usize>,

    /// Health-check path; unset keeps every endpoint permanently healthy.
    pub ping: Option<String>,

    pub ping_timeout_ms: u64,
    pub ping_backoff_base_ms: u64,
    pub ping_backoff_max_ms: u64,

    /// Idle timeout of a request attempt.
    pub timeout_ms: u64,

    /// Period of the timeout sweep and rate computation.
    pub resolution_ms: u64,

    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub max_hangups: u32,
    pub max_aborts: u32,

    /// Reuse connections between requests.
    pub keep_alive: bool,

    /// Exchanges a connection carries before it is closed.
    pub max_requests_per_connection: u64,

    pub connect_timeout_ms: u64,

    /// Request count at which endpoint counters are rebased.
    pub counter_ceiling: u64,

    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            endpoints: Vec::new(),
            max_pending: 1000,
            max_sockets: 5,
            max_pool_size: None,
            ping: None,
            ping_timeout_ms: 5000,
            ping_backoff_base_ms: 10,
            ping_backoff_max_ms: 20_000,
            timeout_ms: 60_000,
            resolution_ms: 1000,
            retry_delay_ms: 20,
            max_retries: 5,
            max_hangups: 2,
            max_aborts: 2,
            keep_alive: false,
            max_requests_per_connection: 1000,
            connect_timeout_ms: 5000,
            counter_ceiling: 1 << 52,
            event_capacity: 1024,
        }
    }
}

impl PoolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn ping_backoff_base(&self) -> Duration {
        Duration::from_millis(self.ping_backoff_base_ms)
    }

    pub fn ping_backoff_max(&self) -> Duration {
        Duration::from_millis(self.ping_backoff_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of plain text.
    pub json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Period of the pool stats gauges, in milliseconds.
    pub stats_interval_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            stats_interval_ms: 1000,
        }
    }
}
