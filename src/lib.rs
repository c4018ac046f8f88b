//! Client-side HTTP load balancer.
//!
//! A [`Pool`] spreads requests over interchangeable backend endpoints,
//! retries failed attempts on other endpoints, and takes failing endpoints
//! out of rotation until a health probe brings them back.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::{LbConfig, PoolConfig};
pub use lifecycle::Shutdown;
pub use load_balancer::{
    Method, Pool, PoolError, Reason, RequestBody, RequestError, RequestOptions, Response,
};
pub use observability::PoolEvent;
pub use transport::http1::HyperTransport;
