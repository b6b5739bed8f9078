//! Server abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server of a leaf service
//! - Track in-flight requests (for least connections)
//! - Own the server's health state

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use crate::health::state::{HealthState, HealthTracker};

/// A single upstream server.
#[derive(Debug)]
pub struct Server {
    /// Base URL requests are forwarded to.
    pub url: Url,
    /// Relative weight for weighted round robin.
    pub weight: u32,
    /// Number of requests currently in flight.
    active_requests: AtomicUsize,
    health: HealthTracker,
}

impl Server {
    /// Parse `url` and create a healthy server.
    pub fn new(url: &str, weight: u32) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(url)?,
            weight,
            active_requests: AtomicUsize::new(0),
            health: HealthTracker::new(),
        })
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Count a request as in flight until the guard is dropped.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            server: self.clone(),
        }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn state(&self) -> HealthState {
        self.health.state()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct InFlightGuard {
    server: Arc<Server>,
}

impl Deref for InFlightGuard {
    type Target = Server;
    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.server.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}
