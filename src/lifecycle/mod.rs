//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoint created
//!     → owns a Shutdown
//!     → timeout/rate ticker and pinger run bound to it
//!
//! Endpoint::close / drop
//!     → Shutdown::trigger (or sender dropped)
//!     → background tasks observe it and exit
//!
//! Binary watch mode (signals.rs):
//!     Ctrl+C → pool.close() → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown is per endpoint so removing one backend stops only its tasks
//! - Tasks hold weak references; a dropped endpoint also ends them

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
