//! Upstream API integration.
//!
//! # Data Flow
//! ```text
//! App id + private key (config / environment)
//!     → app_auth.rs (sign application JWT)
//!     → client.rs  (list installations, mint installation token, read /meta)
//!     → bootstrap.rs (orchestrate, parse ranges into CidrBlocks)
//! ```
//!
//! # Security Constraints
//! - Private keys and tokens never appear in logs or Debug output
//! - Every call has a bounded timeout

pub mod app_auth;
pub mod bootstrap;
pub mod client;
pub mod types;

pub use app_auth::AppCredentials;
pub use bootstrap::{spawn_refresh, Bootstrapper};
pub use client::{ClientAuth, GithubClient};
pub use types::{BootstrapError, BootstrapResult, Installation, InstallationToken, Meta};
