//! Error types of the pool.

use std::time::Duration;

use serde::Serialize;

use crate::load_balancer::request::Method;
use crate::load_balancer::stats::EndpointStats;
use crate::transport::{Phase, TransportError, TransportErrorKind};

/// Machine-readable classification of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Every endpoint is at its pending limit.
    Full,
    /// No endpoint is healthy.
    Unhealthy,
    /// The connection closed before a response.
    SocketHangUp,
    /// The response was cut off, or the request timed out.
    Aborted,
    /// The retry filter rejected the response.
    Filter,
    Other(String),
}

impl Reason {
    pub fn as_str(&self) -> &str {
        match self {
            Reason::Full => "full",
            Reason::Unhealthy => "unhealthy",
            Reason::SocketHangUp => "socket hang up",
            Reason::Aborted => "aborted",
            Reason::Filter => "filter",
            Reason::Other(reason) => reason,
        }
    }

    /// Reported by a sentinel endpoint; never worth a retry.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Reason::Full | Reason::Unhealthy)
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Reason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<&TransportErrorKind> for Reason {
    fn from(kind: &TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::HangUp => Reason::SocketHangUp,
            TransportErrorKind::Aborted => Reason::Aborted,
            TransportErrorKind::Other(reason) => Reason::Other(reason.clone()),
        }
    }
}

/// Context of the attempt that produced an error.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptInfo {
    pub endpoint: EndpointStats,
    pub method: Method,
    pub path: String,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub phase: Phase,
    pub elapsed: Duration,
    /// From the end of the request to the start of the response, or to the
    /// failure when no response started.
    pub latency: Duration,
}

/// A failed attempt, or the final failure of a logical request.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct RequestError {
    pub reason: Reason,
    pub message: String,
    /// Backoff chosen before the next attempt, set on retries.
    pub delay: Option<Duration>,
    pub attempt: Option<Box<AttemptInfo>>,
}

impl RequestError {
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            delay: None,
            attempt: None,
        }
    }

    pub(crate) fn with_attempt(mut self, attempt: AttemptInfo) -> Self {
        self.attempt = Some(Box::new(attempt));
        self
    }

    /// Name of the endpoint the attempt ran on.
    pub fn endpoint(&self) -> Option<&str> {
        self.attempt.as_ref().map(|attempt| attempt.endpoint.name.as_str())
    }
}

impl From<TransportError> for RequestError {
    fn from(e: TransportError) -> Self {
        RequestError::new(Reason::from(&e.kind), e.message)
    }
}

/// Errors constructing or reshaping a pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("endpoint list is empty")]
    NoEndpoints,

    #[error("no valid host:port in endpoint list {0:?}")]
    NoValidEndpoints(Vec<String>),

    #[error("max_pool_size must be greater than zero")]
    InvalidPoolSize,
}
