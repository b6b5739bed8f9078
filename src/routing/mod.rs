//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (route lookup in the entry point's table)
//!     → rule.rs (evaluate the rule expression)
//!     → Return: matched route or NoMatch
//!
//! Route Compilation (per build):
//!     RouterSpec[]
//!     → rule.rs parses each rule once
//!     → Sort by priority, specificity, name
//!     → Index by host, freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Tables are rebuilt, never mutated, when configuration changes
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins

pub mod router;
pub mod rule;

pub use router::{RouteEntry, RouteTable};
pub use rule::{request_host, Rule, RuleError};
