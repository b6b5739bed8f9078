//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (providers, pipeline, health checks)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The switch starts with an empty graph (every request 404s) until the
//!   first build is published
//! - Listeners start last (traffic only when everything else runs)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{serve_admin, AdminState};
use crate::config::ProxyConfig;
use crate::health::{HealthMonitor, HttpProber, Prober};
use crate::http::{HttpForwarder, HttpServer};
use crate::lifecycle::shutdown::{drain, Shutdown};
use crate::load_balancer::Upstream;
use crate::middleware::MiddlewareRegistry;
use crate::observability::metrics;
use crate::pipeline::{Aggregator, Builder, LiveGraph, Pipeline, Switch, Validator};
use crate::provider::{
    fragment_channel, spawn_provider, FileProvider, FragmentSender, InlineProvider,
    ProviderHandle,
};
use crate::tls::{CertificateStore, TlsError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot bind {name} on {address}: {source}")]
    Bind {
        name: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate error: {0}")]
    Tls(#[from] TlsError),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// Assembles a router from its static configuration.
pub struct Startup {
    config: ProxyConfig,
    registry: MiddlewareRegistry,
    upstream: Option<Arc<dyn Upstream>>,
    prober: Option<Arc<dyn Prober>>,
}

impl Startup {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            registry: MiddlewareRegistry::with_builtin(),
            upstream: None,
            prober: None,
        }
    }

    /// Use a registry with additional middleware types.
    pub fn with_registry(mut self, registry: MiddlewareRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the HTTP forwarder.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Replace the HTTP health prober.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub async fn start(self) -> Result<Running, StartupError> {
        let Startup {
            config,
            registry,
            upstream,
            prober,
        } = self;
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_address
                .parse()
                .map_err(|e: std::net::AddrParseError| StartupError::Metrics(e.to_string()))?;
            metrics::init_metrics(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
        }

        let certificates = Arc::new(CertificateStore::new());
        for cert in &config.tls.certificates {
            certificates.load_pem(&cert.names, &cert.cert_file, &cert.key_file)?;
        }

        let entry_points = config.entry_point_names();
        let switch = Arc::new(Switch::new(LiveGraph::empty(entry_points.clone())));
        let registry = Arc::new(registry);
        let upstream: Arc<dyn Upstream> = match upstream {
            Some(upstream) => upstream,
            None => Arc::new(HttpForwarder::new(
                Duration::from_secs(config.timeouts.connect_secs),
                Duration::from_secs(config.timeouts.request_secs),
            )),
        };

        // Pipeline first, so no fragment is sent before its consumer exists.
        let (fragments, fragment_rx) = fragment_channel();
        let pipeline = Pipeline::new(
            Validator::new(registry.clone(), entry_points.clone()),
            Builder::new(registry, upstream, entry_points),
            switch.clone(),
            Duration::from_millis(config.pipeline.build_timeout_ms),
        );
        let aggregator = Aggregator::new(
            Duration::from_millis(config.providers.debounce_ms),
            config.providers.conflict_policy,
        );
        tasks.extend(pipeline.spawn(aggregator, fragment_rx, shutdown.sender()));

        if let Some(file) = &config.providers.file {
            tasks.push(spawn_provider(
                Box::new(FileProvider::new(file.path.clone(), file.watch)),
                fragments.clone(),
                shutdown.subscribe(),
            ));
        }
        if let Some(inline) = &config.providers.inline {
            tasks.push(spawn_provider(
                Box::new(InlineProvider::new(inline.clone())),
                fragments.clone(),
                shutdown.subscribe(),
            ));
        }

        if config.health.enabled {
            let prober: Arc<dyn Prober> = match prober {
                Some(prober) => prober,
                None => Arc::new(HttpProber::new()),
            };
            let monitor = HealthMonitor::new(
                switch.clone(),
                prober,
                Duration::from_millis(config.health.tick_ms),
            );
            tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }

        let server = Arc::new(HttpServer::new(
            switch.clone(),
            Duration::from_secs(config.timeouts.total_secs),
        ));
        let mut bound = BTreeMap::new();
        for (name, entry_point) in &config.entry_points {
            let listener = bind(name, &entry_point.address).await?;
            let addr = listener.local_addr().map_err(|source| StartupError::Bind {
                name: name.clone(),
                address: entry_point.address.clone(),
                source,
            })?;
            bound.insert(name.clone(), addr);

            let server = server.clone();
            let name = name.clone();
            let shutdown_rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(&name, listener, shutdown_rx).await {
                    tracing::error!(entry_point = %name, error = %e, "Entry point failed");
                }
            }));
        }

        let mut admin_address = None;
        if config.admin.enabled {
            let listener = bind("admin", &config.admin.bind_address).await?;
            admin_address = listener.local_addr().ok();
            let state = AdminState {
                switch: switch.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
            };
            let shutdown_rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve_admin(state, listener, shutdown_rx).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }));
        }

        tracing::info!(
            entry_points = ?bound,
            admin = ?admin_address,
            "Router started"
        );

        Ok(Running {
            switch,
            certificates,
            entry_points: bound,
            admin_address,
            fragments,
            shutdown,
            tasks,
        })
    }
}

async fn bind(name: &str, address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            name: name.to_string(),
            address: address.to_string(),
            source,
        })
}

/// A started router.
pub struct Running {
    switch: Arc<Switch>,
    certificates: Arc<CertificateStore>,
    entry_points: BTreeMap<String, SocketAddr>,
    admin_address: Option<SocketAddr>,
    fragments: FragmentSender,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    pub fn switch(&self) -> &Arc<Switch> {
        &self.switch
    }

    /// Store consulted for SNI certificates; an ACME client may push into it.
    pub fn certificates(&self) -> &Arc<CertificateStore> {
        &self.certificates
    }

    /// Bound address of an entry point.
    pub fn entry_point_address(&self, name: &str) -> Option<SocketAddr> {
        self.entry_points.get(name).copied()
    }

    pub fn admin_address(&self) -> Option<SocketAddr> {
        self.admin_address
    }

    /// A programmatic provider feeding this router's pipeline.
    pub fn provider(&self, name: &str) -> ProviderHandle {
        ProviderHandle::new(name, self.fragments.clone())
    }

    /// Signal shutdown and wait up to `grace` for every task.
    pub async fn stop(self, grace: Duration) -> bool {
        tracing::info!("Shutting down");
        self.shutdown.trigger();
        drain(self.tasks, grace).await
    }
}
