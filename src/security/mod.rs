//! Request admission.
//!
//! # Data Flow
//! ```text
//! Boot:
//!     upstream bootstrap → cidr.rs (TrustedRanges, shared read-only)
//!
//! Incoming request:
//!     → rate_limit.rs (peer address → trusted? → shared counter)
//!     → Pass to the webhook pipeline, or 429
//! ```
//!
//! # Design Decisions
//! - Trusted sources bypass the counter entirely
//! - Fail open: a counter store outage must not take the service down
//! - Only the direct peer address is trusted for identification

pub mod cidr;
pub mod rate_limit;

pub use cidr::{is_trusted, CidrBlock, MalformedRangeError, TrustedRanges};
pub use rate_limit::{rate_limit_middleware, Admission, AdmissionGate, GateLimits, Outcome, Verdict};
