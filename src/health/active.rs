//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the servers of every leaf service that has a
//!   health check policy
//! - Update server health state based on results
//!
//! The monitor reads the live graph on every tick, so it always probes the
//! pools currently in service. Pools reused across rebuilds keep their
//! probe schedule and their health state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::dynamic::HealthCheckSpec;
use crate::health::state::HealthState;
use crate::load_balancer::{Server, ServerPool};
use crate::middleware::BoxFuture;
use crate::observability::metrics;
use crate::pipeline::switch::Switch;

/// Checks a single server.
pub trait Prober: Send + Sync {
    /// True when the server answered the probe successfully in time.
    fn probe<'a>(&'a self, server: &'a Server, policy: &'a HealthCheckSpec) -> BoxFuture<'a, bool>;
}

/// Probes `GET <server><path>` and expects a 2xx within the policy timeout.
pub struct HttpProber {
    client: Client<HttpConnector, Body>,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober for HttpProber {
    fn probe<'a>(&'a self, server: &'a Server, policy: &'a HealthCheckSpec) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let uri = format!(
                "{}{}",
                server.url.as_str().trim_end_matches('/'),
                policy.path
            );

            let request = match Request::builder()
                .method("GET")
                .uri(&uri)
                .header("user-agent", "edge-router-health-check")
                .body(Body::empty())
            {
                Ok(req) => req,
                Err(e) => {
                    tracing::error!(uri = %uri, error = %e, "Failed to build health check request");
                    return false;
                }
            };

            let timeout = Duration::from_secs(policy.timeout_secs.max(1));
            match time::timeout(timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let success = response.status().is_success();
                    if !success {
                        tracing::debug!(server = %server.url, status = %response.status(), "Health check failed: non-success status");
                    }
                    success
                }
                Ok(Err(e)) => {
                    tracing::debug!(server = %server.url, error = %e, "Health check failed: connection error");
                    false
                }
                Err(_) => {
                    tracing::debug!(server = %server.url, "Health check failed: timeout");
                    false
                }
            }
        })
    }
}

pub struct HealthMonitor {
    switch: Arc<Switch>,
    prober: Arc<dyn Prober>,
    tick: Duration,
}

impl HealthMonitor {
    pub fn new(switch: Arc<Switch>, prober: Arc<dyn Prober>, tick: Duration) -> Self {
        Self {
            switch,
            prober,
            tick,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "Health monitor starting");

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_due(Instant::now()).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one probe round for every pool that is due at `now`.
    pub async fn check_due(&self, now: Instant) {
        let graph = self.switch.load();
        let due: Vec<&Arc<ServerPool>> = graph.pools().filter(|pool| pool.claim_probe(now)).collect();
        if due.is_empty() {
            return;
        }

        let mut probes = Vec::new();
        for pool in due {
            let Some(policy) = pool.health_check() else {
                continue;
            };
            for server in pool.servers() {
                probes.push(async move {
                    let healthy = self.prober.probe(server, policy).await;
                    let transition = server.health().record_probe(
                        healthy,
                        policy.healthy_threshold,
                        policy.unhealthy_threshold,
                    );
                    if let Some(state) = transition {
                        match state {
                            HealthState::Healthy => {
                                tracing::info!(service = %pool.name(), server = %server.url, "Server recovered")
                            }
                            HealthState::Unhealthy => {
                                tracing::warn!(service = %pool.name(), server = %server.url, "Server marked unhealthy")
                            }
                        }
                        metrics::record_server_health(
                            pool.name(),
                            server.url.as_str(),
                            state == HealthState::Healthy,
                        );
                    }
                });
            }
        }
        join_all(probes).await;
    }
}
