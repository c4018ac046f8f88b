//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Pool::request
//!     → request_set.rs (attempt budget, hang up and abort budgets)
//!     → Pool::get_endpoint → Endpoint::request
//!     → On failure: backoff.rs (jittered delay), Retrying event, next attempt
//! ```
//!
//! # Design Decisions
//! - Every attempt has a deadline enforced by the endpoint's idle sweep
//! - Streamed bodies cannot be replayed, so they get exactly one attempt
//! - Exhaustion errors (`full`, `unhealthy`) are never retried

pub mod backoff;
pub mod request_set;

pub use request_set::RequestSet;
