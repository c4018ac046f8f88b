//! Pool lifecycle events.
//!
//! # Responsibilities
//! - Define every event the pool and its endpoints publish
//! - Fan events out to any number of subscribers
//!
//! # Design Decisions
//! - Broadcast channel: publishing never blocks a request, and a slow
//!   subscriber only loses its own oldest events
//! - Publishing with no subscribers is a no-op

use std::time::Duration;

use hyper::StatusCode;
use tokio::sync::broadcast;

use crate::load_balancer::error::RequestError;
use crate::load_balancer::request::Method;
use crate::transport::Phase;

/// Details of a completed logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingInfo {
    pub method: Method,
    pub path: String,
    /// Endpoint of the last attempt, when there was one.
    pub endpoint: Option<String>,
    pub success: bool,
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An attempt failed and another one follows after `delay`.
    Retrying(RequestError),
    /// An endpoint changed health.
    Health { endpoint: String, healthy: bool },
    /// An in-flight request went idle for longer than its timeout.
    Timeout {
        endpoint: String,
        method: Method,
        path: String,
        phase: Phase,
        idle: Duration,
    },
    /// A logical request finished, successfully or not.
    Timing { duration: Duration, info: TimingInfo },
    /// The final outcome of a logical request.
    Response {
        error: Option<RequestError>,
        method: Method,
        path: String,
        status: Option<StatusCode>,
    },
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::Retrying(_) => "retrying",
            PoolEvent::Health { .. } => "health",
            PoolEvent::Timeout { .. } => "timeout",
            PoolEvent::Timing { .. } => "timing",
            PoolEvent::Response { .. } => "response",
        }
    }
}

/// Publisher side of the pool's event stream.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PoolEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PoolEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        tracing::trace!(event = event.name(), "Publishing pool event");
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}
