//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint needs a connection
//!     → connection.rs acquire (oldest usable idle connection for host:port)
//!     → otherwise Transport::connect
//!     → exchange completes
//!     → connection.rs release (queue it, or retire it at the exchange ceiling)
//! ```
//!
//! # Design Decisions
//! - One tracker per endpoint; queues are never shared across endpoints
//! - Closed connections are discarded lazily when they reach the queue head
//! - A hard per-connection exchange ceiling keeps long-lived connections from
//!   pinning load onto one backend process

pub mod connection;

pub use connection::{ConnectionId, ConnectionTracker, Released, TrackedConnection};
