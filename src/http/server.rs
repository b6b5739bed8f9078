//! Entry point servers.
//!
//! # Responsibilities
//! - One axum server per entry point
//! - Wire up layers (request ID, tracing, overall timeout)
//! - Hand every request to the live graph published by the switch
//!
//! A request loads the live graph once and holds it until its response is
//! produced, so a publish during the request never changes its routing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::request::{request_id, MakeRequestUuid};
use crate::pipeline::Switch;

#[derive(Clone)]
struct EntryPointState {
    name: Arc<str>,
    switch: Arc<Switch>,
}

/// Serves every entry point from the same switch.
pub struct HttpServer {
    switch: Arc<Switch>,
    total_timeout: Duration,
}

impl HttpServer {
    pub fn new(switch: Arc<Switch>, total_timeout: Duration) -> Self {
        Self {
            switch,
            total_timeout,
        }
    }

    /// The axum router of one entry point.
    #[allow(deprecated)]
    pub fn router(&self, entry_point: &str) -> Router {
        let state = EntryPointState {
            name: Arc::from(entry_point),
            switch: self.switch.clone(),
        };
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(self.total_timeout))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve `entry_point` on `listener` until shutdown.
    pub async fn run(
        &self,
        entry_point: &str,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(entry_point, address = %addr, "Entry point listening");

        let app = self
            .router(entry_point)
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(entry_point, "Entry point stopped");
        Ok(())
    }
}

async fn dispatch(State(state): State<EntryPointState>, request: Request<Body>) -> Response<Body> {
    let graph = state.switch.load();
    tracing::debug!(
        entry_point = %state.name,
        generation = graph.generation(),
        request_id = request_id(&request).unwrap_or("unknown"),
        method = %request.method(),
        path = %request.uri().path(),
        "Dispatching request"
    );
    graph.dispatch(&state.name, request).await
}
