//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Bootstrap trusted ranges → Connect store → Build gate
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C / SIGTERM / trigger() → Stop accepting → Drain → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the gate is complete before the listener binds
//! - Background tasks subscribe to the same shutdown broadcast

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_gate, StartupError};
