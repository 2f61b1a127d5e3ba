//! HTTP serving.
//!
//! # Data Flow
//! ```text
//! TCP connection (peer address captured via ConnectInfo)
//!     → server.rs (request id, tracing, timeout)
//!     → security::rate_limit (admission gate)
//!     → application routes (/ping, webhook pipeline)
//! ```

pub mod server;

pub use server::{app_routes, HttpServer, X_REQUEST_ID};
