//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Metrics → Certificates → Pipeline → Providers → Health monitor
//!     → Entry point listeners → Admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → providers withdraw, servers drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: pipeline before providers, listeners last
//! - Shutdown has timeout: remaining tasks are aborted after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Running, Startup, StartupError};
