//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic tick
//!     → read the live graph, pick pools whose probe interval elapsed
//!     → Probe each server of those pools concurrently
//!     → Update state.rs
//!
//! Passive health checks (passive.rs):
//!     Request failure observed by a pool
//!     → Increment failure count
//!     → Mark unhealthy if threshold exceeded
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per-server and isolated per leaf service

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthMonitor, HttpProber, Prober};
pub use state::{HealthState, HealthTracker};
