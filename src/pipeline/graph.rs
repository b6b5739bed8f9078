//! The compiled, immutable routing graph served to requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};

use crate::config::dynamic::{Configuration, EntryError, RouterSpec, TlsOptionSpec};
use crate::http::response;
use crate::load_balancer::{ServerPool, ServiceHandle};
use crate::middleware::{Chain, Middleware};
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::tls::{CertificateMaterial, CertificateResolver};

/// A router ready to serve: its definition plus its compiled chain.
#[derive(Debug)]
pub struct CompiledRouter {
    pub name: String,
    pub spec: RouterSpec,
    pub chain: Chain,
}

/// TLS parameters chosen for a handshake.
#[derive(Debug, Clone)]
pub struct TlsSelection {
    /// Qualified name of the options applied, `None` for defaults.
    pub options_name: Option<String>,
    pub options: TlsOptionSpec,
    pub certificate: Option<Arc<CertificateMaterial>>,
}

/// One published generation of the routing graph.
///
/// Requests hold an `Arc<LiveGraph>` for their whole lifetime, so a graph
/// is dropped only after the last request that started on it finishes.
#[derive(Debug)]
pub struct LiveGraph {
    generation: u64,
    content_hash: Option<u64>,
    entry_points: HashMap<String, RouteTable<Arc<CompiledRouter>>>,
    routers: BTreeMap<String, Arc<CompiledRouter>>,
    services: BTreeMap<String, Arc<ServiceHandle>>,
    middlewares: BTreeMap<String, Arc<dyn Middleware>>,
    configuration: Configuration,
    errors: Vec<EntryError>,
}

/// Parts of a graph assembled by the builder.
pub struct GraphParts {
    pub generation: u64,
    pub content_hash: u64,
    pub entry_points: HashMap<String, RouteTable<Arc<CompiledRouter>>>,
    pub routers: BTreeMap<String, Arc<CompiledRouter>>,
    pub services: BTreeMap<String, Arc<ServiceHandle>>,
    pub middlewares: BTreeMap<String, Arc<dyn Middleware>>,
    pub configuration: Configuration,
    pub errors: Vec<EntryError>,
}

impl LiveGraph {
    /// Generation 0: no routes, every request gets a 404.
    pub fn empty(entry_points: impl IntoIterator<Item = String>) -> Self {
        Self {
            generation: 0,
            content_hash: None,
            entry_points: entry_points
                .into_iter()
                .map(|name| (name, RouteTable::new(Vec::new())))
                .collect(),
            routers: BTreeMap::new(),
            services: BTreeMap::new(),
            middlewares: BTreeMap::new(),
            configuration: Configuration::default(),
            errors: Vec::new(),
        }
    }

    pub fn from_parts(parts: GraphParts) -> Self {
        Self {
            generation: parts.generation,
            content_hash: Some(parts.content_hash),
            entry_points: parts.entry_points,
            routers: parts.routers,
            services: parts.services,
            middlewares: parts.middlewares,
            configuration: parts.configuration,
            errors: parts.errors,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hash of the configuration this graph was built from; `None` for the
    /// initial empty graph.
    pub fn content_hash(&self) -> Option<u64> {
        self.content_hash
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn errors(&self) -> &[EntryError] {
        &self.errors
    }

    pub fn routers(&self) -> &BTreeMap<String, Arc<CompiledRouter>> {
        &self.routers
    }

    pub fn services(&self) -> &BTreeMap<String, Arc<ServiceHandle>> {
        &self.services
    }

    pub fn middlewares(&self) -> &BTreeMap<String, Arc<dyn Middleware>> {
        &self.middlewares
    }

    pub fn service(&self, name: &str) -> Option<&Arc<ServiceHandle>> {
        self.services.get(name)
    }

    pub fn entry_point(&self, name: &str) -> Option<&RouteTable<Arc<CompiledRouter>>> {
        self.entry_points.get(name)
    }

    pub fn entry_point_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entry_points.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Leaf pools of this graph.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<ServerPool>> {
        self.services.values().filter_map(|s| s.as_pool())
    }

    /// The router that would serve `req` on `entry_point`.
    pub fn match_route<B>(&self, entry_point: &str, req: &Request<B>) -> Option<&Arc<CompiledRouter>> {
        self.entry_points
            .get(entry_point)?
            .match_request(req)
            .map(|route| &route.target)
    }

    /// Route a request through the matching router's chain; 404 if none.
    pub async fn dispatch(&self, entry_point: &str, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let Some(router) = self.match_route(entry_point, &req) else {
            tracing::debug!(entry_point, path = %req.uri().path(), "No matching router");
            metrics::record_request(entry_point, "", 404, start);
            return response::not_found();
        };

        let response = router.chain.handle(req).await;
        metrics::record_request(entry_point, &router.name, response.status().as_u16(), start);
        response
    }

    /// TLS options and certificate for a handshake on `entry_point` with
    /// SNI `server_name`.
    ///
    /// Options come from the first router, in match order, whose rule
    /// requires that host and which has a TLS section.
    pub fn tls_for(
        &self,
        entry_point: &str,
        server_name: &str,
        resolver: &dyn CertificateResolver,
    ) -> TlsSelection {
        let server_name = server_name.to_ascii_lowercase();
        let options_name = self.entry_points.get(entry_point).and_then(|table| {
            table
                .candidates(Some(&server_name))
                .filter(|route| route.target.spec.tls.is_some())
                .find(|route| {
                    route
                        .rule
                        .required_hosts()
                        .is_some_and(|hosts| hosts.iter().any(|h| *h == server_name))
                })
                .and_then(|route| route.target.spec.tls.as_ref()?.options.clone())
        });
        let options = options_name
            .as_ref()
            .and_then(|name| self.configuration.tls_options.get(name))
            .cloned()
            .unwrap_or_default();

        TlsSelection {
            options_name,
            options,
            certificate: resolver.resolve(&server_name),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_pools(generation: u64, pools: Vec<Arc<ServerPool>>) -> Self {
        let mut graph = Self::empty(Vec::new());
        graph.generation = generation;
        graph.services = pools
            .into_iter()
            .map(|pool| {
                (
                    pool.name().to_string(),
                    Arc::new(ServiceHandle::LoadBalanced(pool)),
                )
            })
            .collect();
        graph
    }

    #[cfg(test)]
    pub(crate) fn with_generation(generation: u64) -> Self {
        let mut graph = Self::empty(vec!["web".to_string()]);
        graph.generation = generation;
        graph
    }
}
