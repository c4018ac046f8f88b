//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Expose a Prometheus-compatible scrape endpoint
//! - Turn pool events into counters and histograms
//! - Publish periodic pool summaries as gauges
//!
//! # Metrics
//! - `lb_pool_requests_total` (counter): logical requests by outcome
//! - `lb_pool_retries_total` (counter): retried attempts by reason
//! - `lb_pool_timeouts_total` (counter): idle timeouts by phase
//! - `lb_pool_request_duration_seconds` (histogram): last attempt latency (request end to response start) by path
//! - `lb_pool_connections_total` (counter): attempts by connection kind (new, reused)
//! - `lb_pool_endpoint_health` (gauge): 1=healthy, 0=unhealthy
//! - `lb_pool_pending`, `lb_pool_connections`, `lb_pool_unhealthy`,
//!   `lb_pool_rate` (gauges): pool summary
//!
//! # Design Decisions
//! - Nothing here runs on the request path; everything is fed from the
//!   event stream or a periodic snapshot
//! - Every series carries a `pool` label

use std::net::SocketAddr;
use std::sync::Weak;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::load_balancer::pool::Pool;
use crate::load_balancer::stats::PoolSummary;
use crate::observability::events::PoolEvent;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Path label without its query string.
pub fn path_label(path: &str) -> String {
    path.split(['?', '#']).next().unwrap_or(path).to_string()
}

fn outcome_label(event: &PoolEvent) -> Option<String> {
    match event {
        PoolEvent::Response { error: None, .. } => Some("success".to_string()),
        PoolEvent::Response { error: Some(err), .. } => Some(err.reason.as_str().to_string()),
        _ => None,
    }
}

/// Record one pool event.
pub fn record_event(pool: &str, event: &PoolEvent) {
    let pool = pool.to_string();
    match event {
        PoolEvent::Retrying(err) => {
            metrics::counter!(
                "lb_pool_retries_total",
                "pool" => pool,
                "reason" => err.reason.as_str().to_string()
            )
            .increment(1);
        }
        PoolEvent::Health { endpoint, healthy } => {
            metrics::gauge!(
                "lb_pool_endpoint_health",
                "pool" => pool,
                "endpoint" => endpoint.clone()
            )
            .set(if *healthy { 1.0 } else { 0.0 });
        }
        PoolEvent::Timeout { phase, .. } => {
            metrics::counter!("lb_pool_timeouts_total", "pool" => pool, "phase" => phase.as_str())
                .increment(1);
        }
        PoolEvent::Timing { duration, info } => {
            let kind = if info.reused { "reused" } else { "new" };
            metrics::counter!("lb_pool_connections_total", "pool" => pool.clone(), "kind" => kind)
                .increment(1);
            metrics::histogram!(
                "lb_pool_request_duration_seconds",
                "pool" => pool,
                "path" => path_label(&info.path)
            )
            .record(duration.as_secs_f64());
        }
        PoolEvent::Response { .. } => {
            if let Some(outcome) = outcome_label(event) {
                metrics::counter!("lb_pool_requests_total", "pool" => pool, "outcome" => outcome)
                    .increment(1);
            }
        }
    }
}

/// Publish a pool summary as gauges.
pub fn record_summary(pool: &str, summary: &PoolSummary) {
    let pool = pool.to_string();
    metrics::gauge!("lb_pool_pending", "pool" => pool.clone()).set(summary.total_pending as f64);
    metrics::gauge!("lb_pool_connections", "pool" => pool.clone()).set(summary.total_connections as f64);
    metrics::gauge!("lb_pool_unhealthy", "pool" => pool.clone()).set(summary.total_unhealthy as f64);
    metrics::gauge!("lb_pool_rate", "pool" => pool).set(summary.total_rate as f64);
}

/// Record every event from `rx` until the pool's publisher goes away.
pub fn spawn_event_recorder(pool: String, mut rx: broadcast::Receiver<PoolEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => record_event(&pool, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(pool = %pool, skipped, "Metrics recorder lagging behind pool events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Publish the pool summary every `interval` while the pool is alive.
pub fn spawn_stats_reporter(pool: Weak<Pool>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            record_summary(pool.name(), &pool.summary());
        }
    })
}
