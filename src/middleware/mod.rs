//! Middleware subsystem.
//!
//! # Data Flow
//! ```text
//! MiddlewareSpec { kind, params }
//!     → registry.rs (kind → typed factory, schema check)
//!     → Arc<dyn Middleware> (compiled once per named middleware per build)
//!     → shared by every router chain that references it
//!
//! Request through a router:
//!     Chain → Next(m1) → Next(m2) → ... → ServiceHandle
//! ```
//!
//! # Design Decisions
//! - Middlewares are immutable and reference-counted; a rebuild compiles
//!   new instances rather than mutating live ones
//! - `chain` middlewares are flattened into the router's list at build time
//! - `Next` is `Copy`, so a middleware may call downstream more than once

pub mod builtin;
pub mod rate_limit;
pub mod registry;
pub mod retry;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use futures_util::{stream, StreamExt};
use axum::http::request::Parts;
use axum::http::uri::{PathAndQuery, Uri};
use axum::http::{Request, Response};

use crate::load_balancer::ServiceHandle;

pub use registry::{MiddlewareConfig, MiddlewareFactory, MiddlewareRegistry};

/// Boxed, sendable future used at the dynamic seams of the request path.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A compiled middleware instance.
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Handle a request, usually by calling `next.run(req)`.
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>>;
}

/// The remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    service: &'a ServiceHandle,
}

impl<'a> Next<'a> {
    /// Pass the request to the next middleware, or to the service.
    pub fn run(self, req: Request<Body>) -> BoxFuture<'a, Response<Body>> {
        match self.middlewares.split_first() {
            Some((first, rest)) => first.handle(
                req,
                Next {
                    middlewares: rest,
                    service: self.service,
                },
            ),
            None => self.service.serve(req),
        }
    }
}

/// A router's middlewares in declared order, ending in its service.
#[derive(Debug, Clone)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
    service: Arc<ServiceHandle>,
}

impl Chain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, service: Arc<ServiceHandle>) -> Self {
        Self {
            middlewares,
            service,
        }
    }

    pub fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response<Body>> {
        Next {
            middlewares: &self.middlewares,
            service: &self.service,
        }
        .run(req)
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub fn service(&self) -> &Arc<ServiceHandle> {
        &self.service
    }
}

/// Replace the request path, keeping the query string.
pub(crate) fn set_path(req: &mut Request<Body>, path: &str) -> Result<(), axum::http::Error> {
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    *req.uri_mut() = Uri::from_parts(parts)?;
    Ok(())
}

/// Rebuild a request from buffered parts, for replay or mirroring.
pub(crate) fn replay_request(parts: &Parts, body: &Bytes) -> Request<Body> {
    let mut req = Request::new(Body::from(body.clone()));
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();
    req
}

/// A request body read up to a limit.
pub(crate) enum BufferedBody {
    /// The whole body fit.
    Complete(Bytes),
    /// The limit was crossed; the bytes read so far followed by the rest of
    /// the stream.
    Overflow(Body),
}

/// Buffer at most `limit` bytes of `body` without losing any of it.
pub(crate) async fn buffer_body(body: Body, limit: usize) -> Result<BufferedBody, axum::Error> {
    let mut rest = body.into_data_stream();
    let mut buffered = Vec::new();
    while let Some(chunk) = rest.next().await {
        let chunk = chunk?;
        if buffered.len() + chunk.len() > limit {
            let head = stream::iter([
                Ok::<_, axum::Error>(Bytes::from(buffered)),
                Ok(chunk),
            ]);
            return Ok(BufferedBody::Overflow(Body::from_stream(head.chain(rest))));
        }
        buffered.extend_from_slice(&chunk);
    }
    Ok(BufferedBody::Complete(Bytes::from(buffered)))
}

/// Declared body length, if any.
pub(crate) fn content_length(req: &Request<Body>) -> Option<u64> {
    req.headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
