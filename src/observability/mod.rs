//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool and endpoints produce:
//!     → events.rs (PoolEvent broadcast: retrying, health, timeout, timing, response)
//!     → tracing macros (structured log events)
//!
//! Consumers:
//!     → logging.rs (stdout, plain or JSON)
//!     → metrics.rs (events and summaries into Prometheus series)
//!     → library callers via Pool::subscribe
//! ```
//!
//! # Design Decisions
//! - Events are fire and forget; a pool without subscribers emits nothing
//! - Slow subscribers lag and skip events instead of blocking requests
//! - Metrics are opt-in and fed from the event stream, never from the hot path

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventEmitter, PoolEvent, TimingInfo};
