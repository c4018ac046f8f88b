//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LbConfig (validated, immutable)
//!     → PoolConfig handed to Pool::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new LbConfig sent over mpsc
//!     → Pool::sync_endpoints reconciles membership
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only membership follows a reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{LbConfig, ObservabilityConfig, PoolConfig};
pub use validation::ValidationError;
