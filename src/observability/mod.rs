//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission gate, bootstrapper, store:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (deny / degraded / bypass counters)
//!
//! Consumers:
//!     → stdout (text or JSON lines)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Denials and fail-open events are separate counters so operators can
//!   tell "service blocked" from "limiter degraded"
//! - The gate emits through `MetricsSink` so emission can be observed in tests

pub mod logging;
pub mod metrics;
