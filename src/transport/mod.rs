//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint::request
//!     → ConnectionTracker (idle connection for host:port?)
//!     → Transport::connect (otherwise open a fresh one)
//!     → Connection::exchange (write request, read full response)
//!         touches the Activity clock on every bit of progress
//!     → ExchangeResponse | TransportError
//! ```
//!
//! # Design Decisions
//! - The core never speaks a wire protocol; it only drives this trait pair
//! - Connections are owned values so the tracker can queue and destroy them
//! - Progress is reported through `Activity` so the endpoint's timeout sweep
//!   can tell an idle request from a slow but live one

pub mod http1;
#[cfg(test)]
pub(crate) mod scripted;

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use hyper::{HeaderMap, StatusCode};
use tokio::time::Instant;

use crate::load_balancer::request::Method;

/// A stream of request body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Opens connections to a backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh connection to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open connection able to carry sequential exchanges.
#[async_trait]
pub trait Connection: Send {
    /// Perform one request/response exchange.
    async fn exchange(&mut self, request: Exchange) -> Result<ExchangeResponse, TransportError>;

    /// False once the connection was closed or destroyed at the transport layer.
    fn is_usable(&self) -> bool;
}

/// Request body handed to the transport.
pub enum ExchangeBody {
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl ExchangeBody {
    /// Byte length when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            ExchangeBody::Empty => Some(0),
            ExchangeBody::Full(bytes) => Some(bytes.len()),
            ExchangeBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl std::fmt::Debug for ExchangeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeBody::Empty => write!(f, "Empty"),
            ExchangeBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            ExchangeBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// Everything the transport needs to perform one exchange.
#[derive(Debug)]
pub struct Exchange {
    pub host: String,
    pub port: u16,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: ExchangeBody,
    pub activity: Activity,
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Classification of a failed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection closed before a response arrived.
    HangUp,
    /// The response was cut off after it had started.
    Aborted,
    /// Anything else, with a short machine-readable reason.
    Other(String),
}

/// Error reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn hang_up(message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::HangUp, message: message.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Aborted, message: message.into() }
    }

    pub fn other(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Other(reason.into()), message: message.into() }
    }
}

/// Where an exchange currently is.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init = 0,
    Connecting = 1,
    RequestWrite = 2,
    RequestEnd = 3,
    ResponseStart = 4,
    ResponseRead = 5,
}

impl From<u8> for Phase {
    fn from(val: u8) -> Self {
        match val {
            1 => Phase::Connecting,
            2 => Phase::RequestWrite,
            3 => Phase::RequestEnd,
            4 => Phase::ResponseStart,
            5 => Phase::ResponseRead,
            _ => Phase::Init,
        }
    }
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Connecting => "connecting",
            Phase::RequestWrite => "req_write",
            Phase::RequestEnd => "req_end",
            Phase::ResponseStart => "res_start",
            Phase::ResponseRead => "res_read",
        }
    }

    /// True once any part of the response has been received.
    pub fn response_started(&self) -> bool {
        matches!(self, Phase::ResponseStart | Phase::ResponseRead)
    }
}

const UNSET: u64 = u64::MAX;

#[derive(Debug)]
struct ActivityInner {
    origin: Instant,
    last_touched_us: AtomicU64,
    phase: AtomicU8,
    request_end_us: AtomicU64,
    response_start_us: AtomicU64,
}

/// Shared progress clock of one exchange.
///
/// Cloning is cheap; the endpoint keeps one clone for its timeout sweep and
/// the transport touches the other.
#[derive(Debug, Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                origin: Instant::now(),
                last_touched_us: AtomicU64::new(0),
                phase: AtomicU8::new(Phase::Init as u8),
                request_end_us: AtomicU64::new(UNSET),
                response_start_us: AtomicU64::new(UNSET),
            }),
        }
    }

    fn now_us(&self) -> u64 {
        self.inner.origin.elapsed().as_micros() as u64
    }

    /// Record progress without changing phase.
    pub fn touch(&self) {
        self.inner.last_touched_us.store(self.now_us(), Ordering::Relaxed);
    }

    /// Record progress and move to `phase`. Phases never move backwards.
    pub fn advance(&self, phase: Phase) {
        self.inner.phase.fetch_max(phase as u8, Ordering::Relaxed);
        let now = self.now_us();
        let mark = match phase {
            Phase::RequestEnd => Some(&self.inner.request_end_us),
            Phase::ResponseStart => Some(&self.inner.response_start_us),
            _ => None,
        };
        if let Some(mark) = mark {
            let _ = mark.compare_exchange(UNSET, now, Ordering::Relaxed, Ordering::Relaxed);
        }
        self.inner.last_touched_us.store(now, Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        Phase::from(self.inner.phase.load(Ordering::Relaxed))
    }

    /// Time since the last recorded progress.
    pub fn idle(&self) -> Duration {
        let touched = Duration::from_micros(self.inner.last_touched_us.load(Ordering::Relaxed));
        self.inner.origin.elapsed().saturating_sub(touched)
    }

    /// Time since the exchange was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.origin.elapsed()
    }

    /// Time from the end of the request to the start of the response.
    ///
    /// A missing mark reads as now.
    pub fn latency(&self) -> Duration {
        let now = self.now_us();
        let mark = |at: &AtomicU64| match at.load(Ordering::Relaxed) {
            UNSET => now,
            us => us,
        };
        let start = mark(&self.inner.request_end_us);
        let end = mark(&self.inner.response_start_us);
        Duration::from_micros(end.saturating_sub(start))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}
