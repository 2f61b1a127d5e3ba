//! Trusted-source-aware distributed rate limiting for a webhook receiver.
//!
//! Requests from the webhook provider's published ranges pass untouched;
//! everyone else is counted in a fixed window shared by all replicas.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod store;
pub mod upstream;

pub use config::GateConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::{AdmissionGate, TrustedRanges, Verdict};
