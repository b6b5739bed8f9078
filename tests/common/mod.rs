//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use edge_router::config::{ConflictPolicy, Configuration};
use edge_router::load_balancer::{Server, Upstream, UpstreamError};
use edge_router::middleware::{BoxFuture, MiddlewareRegistry};
use edge_router::pipeline::{Aggregator, Builder, LiveGraph, Pipeline, Switch, Validator};
use edge_router::provider::{fragment_channel, FragmentSender, ProviderHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const ENTRY_POINT: &str = "web";

/// Parse a dynamic configuration from JSON.
pub fn dynamic(value: serde_json::Value) -> Configuration {
    serde_json::from_value(value).expect("valid dynamic configuration")
}

/// A leaf service definition with the given server URLs.
pub fn service(urls: &[&str]) -> serde_json::Value {
    let servers: Vec<_> = urls.iter().map(|url| serde_json::json!({ "url": url })).collect();
    serde_json::json!({ "loadBalancer": { "servers": servers, "strategy": "roundRobin" } })
}

pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

/// Upstream answering 200 and recording which server each request went to.
#[derive(Default)]
pub struct RecordingUpstream {
    hits: Mutex<Vec<String>>,
}

impl RecordingUpstream {
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.hits.lock().unwrap().clear();
    }
}

impl Upstream for RecordingUpstream {
    fn forward<'a>(
        &'a self,
        server: &'a Server,
        _req: Request<Body>,
        _pass_host_header: bool,
    ) -> BoxFuture<'a, Result<Response<Body>, UpstreamError>> {
        self.hits.lock().unwrap().push(server.url.to_string());
        let url = server.url.to_string();
        Box::pin(async move {
            Ok(Response::builder()
                .header("x-server", url)
                .body(Body::empty())
                .unwrap())
        })
    }
}

/// An in-process pipeline: aggregator, validator, builder and switch.
pub struct TestPipeline {
    pub switch: Arc<Switch>,
    pub fragments: FragmentSender,
    pub shutdown: broadcast::Sender<()>,
}

impl TestPipeline {
    pub fn start(upstream: Arc<dyn Upstream>, debounce: Duration) -> Self {
        Self::start_with(upstream, debounce, ConflictPolicy::Reject)
    }

    pub fn start_with(upstream: Arc<dyn Upstream>, debounce: Duration, policy: ConflictPolicy) -> Self {
        let entry_points = vec![ENTRY_POINT.to_string()];
        let registry = Arc::new(MiddlewareRegistry::with_builtin());
        let switch = Arc::new(Switch::new(LiveGraph::empty(entry_points.clone())));
        let pipeline = Pipeline::new(
            Validator::new(registry.clone(), entry_points.clone()),
            Builder::new(registry, upstream, entry_points),
            switch.clone(),
            Duration::from_secs(5),
        );
        let (fragments, rx) = fragment_channel();
        let (shutdown, _) = broadcast::channel(1);
        pipeline.spawn(Aggregator::new(debounce, policy), rx, &shutdown);
        Self {
            switch,
            fragments,
            shutdown,
        }
    }

    pub fn provider(&self, name: &str) -> ProviderHandle {
        ProviderHandle::new(name, self.fragments.clone())
    }

    /// Wait until a graph of at least `generation` is live.
    pub async fn wait_for_generation(&self, generation: u64) -> Arc<LiveGraph> {
        wait_for_generation(&self.switch, generation).await
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn wait_for_generation(switch: &Switch, generation: u64) -> Arc<LiveGraph> {
    let mut rx = switch.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        while *rx.borrow_and_update() < generation {
            rx.changed().await.expect("switch dropped");
        }
    })
    .await
    .expect("generation published in time");
    switch.load()
}

/// Start a raw HTTP/1.1 backend on an ephemeral port that answers every
/// request with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a raw HTTP/1.1 backend on an ephemeral port whose status and body
/// come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                // Read the request head; test requests carry no body.
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                loop {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                        break;
                    }
                }

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}
