//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Router chain ends in a ServiceHandle
//!     → composite.rs (weighted: pick a child; mirroring: serve + copy)
//!     → pool.rs (leaf service: pick a server)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate, optionally by weight)
//!         - least_conn.rs (pick server with fewest in-flight requests)
//!     → Upstream (forward the request to the chosen server)
//! ```
//!
//! # Design Decisions
//! - Selection state lives in the strategy; health lives on the server
//! - Unhealthy servers are excluded from selection
//! - A pool whose every server is unhealthy answers 503
//! - Pools survive rebuilds when their definition is unchanged, so health
//!   state is not reset by unrelated configuration changes

pub mod composite;
pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use thiserror::Error;

use crate::http::response;
use crate::middleware::BoxFuture;

pub use composite::{Mirroring, WeightedServices};
pub use pool::ServerPool;
pub use server::Server;

/// Server selection strategy.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick a healthy server, or `None` if there is none.
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>>;

    /// Whether `server` can ever be picked, health aside.
    fn can_select(&self, _server: &Server) -> bool {
        true
    }
}

/// Error forwarding a request to a server.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("cannot build upstream request: {0}")]
    Request(String),
}

impl UpstreamError {
    /// Response sent to the client for this error.
    pub fn into_response(self) -> Response<Body> {
        match self {
            UpstreamError::Timeout => response::gateway_timeout(),
            UpstreamError::Transport(_) | UpstreamError::Request(_) => response::bad_gateway(),
        }
    }
}

/// Sends a request to a concrete server.
pub trait Upstream: Send + Sync {
    fn forward<'a>(
        &'a self,
        server: &'a Server,
        req: Request<Body>,
        pass_host_header: bool,
    ) -> BoxFuture<'a, Result<Response<Body>, UpstreamError>>;
}

/// A compiled service: what a router's chain ultimately calls.
#[derive(Debug)]
pub enum ServiceHandle {
    LoadBalanced(Arc<ServerPool>),
    Weighted(WeightedServices),
    Mirroring(Mirroring),
}

impl ServiceHandle {
    pub fn serve(&self, req: Request<Body>) -> BoxFuture<'_, Response<Body>> {
        match self {
            ServiceHandle::LoadBalanced(pool) => pool.serve(req),
            ServiceHandle::Weighted(weighted) => weighted.serve(req),
            ServiceHandle::Mirroring(mirroring) => mirroring.serve(req),
        }
    }

    /// True when at least one server behind this service is healthy.
    pub fn is_available(&self) -> bool {
        match self {
            ServiceHandle::LoadBalanced(pool) => pool.is_available(),
            ServiceHandle::Weighted(weighted) => weighted.is_available(),
            ServiceHandle::Mirroring(mirroring) => mirroring.is_available(),
        }
    }

    pub fn as_pool(&self) -> Option<&Arc<ServerPool>> {
        match self {
            ServiceHandle::LoadBalanced(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceHandle::LoadBalanced(_) => "loadBalancer",
            ServiceHandle::Weighted(_) => "weighted",
            ServiceHandle::Mirroring(_) => "mirroring",
        }
    }
}
