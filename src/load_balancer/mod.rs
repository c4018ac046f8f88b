//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Pool::request(options, body)
//!     → RequestSet (retry policy)
//!     → pool.rs get_endpoint:
//!         - pinned endpoint, if the options name one
//!         - first ready endpoint from a random start
//!         - else least pending healthy endpoint
//!         - else the overloaded or unhealthy sentinel
//!     → endpoint.rs (counters, health, timeouts, connections)
//!     → Response | RequestError
//! ```
//!
//! # Design Decisions
//! - Selection never fails; sentinels turn exhaustion into ordinary errors
//! - Membership changes swap `Arc<Endpoint>`s, so in-flight attempts finish
//!   on the endpoint they started on
//! - Unhealthy endpoints are excluded from selection until their pinger
//!   succeeds

pub mod endpoint;
pub mod error;
pub mod membership;
pub mod pool;
pub mod request;
pub mod stats;

pub use endpoint::{Endpoint, EndpointSettings, Sentinel};
pub use error::{AttemptInfo, PoolError, Reason, RequestError};
pub use membership::parse_host_port;
pub use pool::Pool;
pub use request::{Encoding, Method, RequestBody, RequestOptions, Response, RetryFilter};
pub use stats::{EndpointStats, PoolSummary};
