//! Server health state machine.
//!
//! # States
//! - Healthy: server receives traffic
//! - Unhealthy: server excluded from selection
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive probe failures >= unhealthy_threshold
//!                      or consecutive request failures >= passive threshold
//! Unhealthy → Healthy: consecutive probe successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Servers start Healthy
//! - Hysteresis prevents flapping
//! - Transitions use compare-and-swap so exactly one observer reports each
//! - Counters reset on state transition

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

/// Health of a single server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthState::Healthy,
            _ => HealthState::Unhealthy,
        }
    }
}

/// Lock-free health state plus the counters that drive transitions.
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    probe_successes: AtomicU32,
    probe_failures: AtomicU32,
    request_failures: AtomicU32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Healthy as u8),
            probe_successes: AtomicU32::new(0),
            probe_failures: AtomicU32::new(0),
            request_failures: AtomicU32::new(0),
        }
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Record a probe result. Returns the new state if it changed.
    pub fn record_probe(
        &self,
        success: bool,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Option<HealthState> {
        if success {
            self.probe_failures.store(0, Ordering::Relaxed);
            if self.is_healthy() {
                return None;
            }
            let successes = self.probe_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= healthy_threshold.max(1) {
                return self.transition(HealthState::Unhealthy, HealthState::Healthy);
            }
        } else {
            self.probe_successes.store(0, Ordering::Relaxed);
            if !self.is_healthy() {
                return None;
            }
            let failures = self.probe_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= unhealthy_threshold.max(1) {
                return self.transition(HealthState::Healthy, HealthState::Unhealthy);
            }
        }
        None
    }

    /// Record the outcome of a proxied request. Only failures can change
    /// the state; recovery is left to probes.
    pub fn record_request(&self, success: bool, failure_threshold: u32) -> Option<HealthState> {
        if success {
            self.request_failures.store(0, Ordering::Relaxed);
            return None;
        }
        if !self.is_healthy() {
            return None;
        }
        let failures = self.request_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= failure_threshold.max(1) {
            return self.transition(HealthState::Healthy, HealthState::Unhealthy);
        }
        None
    }

    fn transition(&self, from: HealthState, to: HealthState) -> Option<HealthState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.probe_successes.store(0, Ordering::Relaxed);
        self.probe_failures.store(0, Ordering::Relaxed);
        self.request_failures.store(0, Ordering::Relaxed);
        Some(to)
    }
}
