//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gate.toml (optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: USE_RATE_LIMITING, APP_ID, REDIS_URL, ...)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets never appear in Debug output

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BootstrapFailurePolicy, GateConfig, GithubConfig, ListenerConfig, ObservabilityConfig,
    RateLimitConfig, StoreBackend, StoreConfig,
};
