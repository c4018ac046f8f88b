//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (endpoint.rs):
//!     Attempt fails on an endpoint with a ping path
//!     → state.rs Healthy → Unhealthy, Health event
//!     → pinger.rs starts
//!
//! Active (pinger.rs):
//!     GET ping path with backoff between probes
//!     → 200 → stop, state.rs Unhealthy → Healthy, Health event
//! ```
//!
//! # Design Decisions
//! - One failure is enough to mark an endpoint unhealthy
//! - One successful probe is enough to bring it back
//! - Endpoints without a ping path never change health

pub mod pinger;
pub mod state;

pub use pinger::Pinger;
pub use state::HealthState;
