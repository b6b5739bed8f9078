//! Server pool of a leaf service.
//!
//! # Responsibilities
//! - Hold the servers of one `loadBalancer` service
//! - Apply the configured strategy to select a server
//! - Forward through the upstream and feed passive health checks
//! - Pace active probes for the health monitor

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};

use crate::config::dynamic::{HealthCheckSpec, LoadBalancerSpec, Strategy};
use crate::health::passive;
use crate::http::response;
use crate::load_balancer::{
    least_conn::LeastConnections,
    round_robin::{RoundRobin, WeightedRoundRobin},
    server::Server,
    LoadBalancer, Upstream,
};
use crate::middleware::BoxFuture;
use crate::observability::metrics;

/// Servers of one leaf service plus the strategy that picks among them.
pub struct ServerPool {
    name: String,
    spec: LoadBalancerSpec,
    servers: Vec<Arc<Server>>,
    strategy: Box<dyn LoadBalancer>,
    upstream: Arc<dyn Upstream>,
    created: Instant,
    /// Milliseconds after `created` when the next probe round is due.
    next_probe_ms: AtomicU64,
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("name", &self.name)
            .field("servers", &self.servers)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl ServerPool {
    /// Create a pool. Every server starts healthy.
    pub fn new(
        name: &str,
        spec: LoadBalancerSpec,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, url::ParseError> {
        let servers = spec
            .servers
            .iter()
            .map(|s| Server::new(&s.url, s.weight).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let strategy: Box<dyn LoadBalancer> = match spec.strategy {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::WeightedRoundRobin => {
                let weights: Vec<u32> = servers.iter().map(|s| s.weight).collect();
                Box::new(WeightedRoundRobin::new(&weights))
            }
            Strategy::LeastConnections => Box::new(LeastConnections::new()),
        };

        for server in &servers {
            metrics::record_server_health(name, server.url.as_str(), true);
        }

        Ok(Self {
            name: name.to_string(),
            spec,
            servers,
            strategy,
            upstream,
            created: Instant::now(),
            next_probe_ms: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &LoadBalancerSpec {
        &self.spec
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn health_check(&self) -> Option<&HealthCheckSpec> {
        self.spec.health_check.as_ref()
    }

    /// True when the strategy has a healthy server to pick.
    pub fn is_available(&self) -> bool {
        self.servers
            .iter()
            .any(|s| s.is_healthy() && self.strategy.can_select(s))
    }

    /// Select a server with the pool's strategy.
    pub fn select(&self) -> Option<Arc<Server>> {
        self.strategy.next_server(&self.servers)
    }

    /// Forward a request to a selected server.
    pub fn serve(&self, req: Request<Body>) -> BoxFuture<'_, Response<Body>> {
        Box::pin(async move {
            let Some(server) = self.select() else {
                tracing::warn!(service = %self.name, "No healthy server available");
                return response::service_unavailable();
            };
            let guard = server.track();

            let outcome = self
                .upstream
                .forward(&guard, req, self.spec.pass_host_header)
                .await;

            if let Some(threshold) = self
                .spec
                .health_check
                .as_ref()
                .and_then(|hc| hc.passive_failure_threshold)
            {
                if passive::observe(&self.name, &guard, threshold, &outcome).is_some() {
                    metrics::record_server_health(&self.name, guard.url.as_str(), false);
                }
            }

            match outcome {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(service = %self.name, server = %guard.url, error = %e, "Upstream request failed");
                    e.into_response()
                }
            }
        })
    }

    /// Claim the next probe round if it is due at `now`.
    ///
    /// Returns `true` for exactly one caller per interval.
    pub fn claim_probe(&self, now: Instant) -> bool {
        let Some(policy) = self.health_check() else {
            return false;
        };
        let now_ms = now.saturating_duration_since(self.created).as_millis() as u64;
        let due = self.next_probe_ms.load(Ordering::Acquire);
        if now_ms < due {
            return false;
        }
        let interval = Duration::from_secs(policy.interval_secs.max(1)).as_millis() as u64;
        self.next_probe_ms
            .compare_exchange(due, now_ms + interval, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
