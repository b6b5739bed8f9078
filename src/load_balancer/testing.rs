//! In-process upstreams for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode};

use crate::config::dynamic::{LoadBalancerSpec, ServerSpec, Strategy};
use crate::load_balancer::{Server, ServerPool, ServiceHandle, Upstream, UpstreamError};
use crate::middleware::BoxFuture;

/// Answers 200 and reflects the request back in `x-echo-*` headers.
pub(crate) struct EchoUpstream;

impl Upstream for EchoUpstream {
    fn forward<'a>(
        &'a self,
        server: &'a Server,
        req: Request<Body>,
        _pass_host_header: bool,
    ) -> BoxFuture<'a, Result<Response<Body>, UpstreamError>> {
        Box::pin(async move {
            let mut response = Response::new(Body::empty());
            let headers = response.headers_mut();
            let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            headers.insert("x-echo-path", HeaderValue::from_str(path).unwrap());
            headers.insert("x-echo-server", HeaderValue::from_str(server.url.as_str()).unwrap());
            for (name, value) in req.headers() {
                let echoed = HeaderName::from_bytes(format!("x-echo-{}", name).as_bytes()).unwrap();
                headers.insert(echoed, value.clone());
            }
            Ok(response)
        })
    }
}

/// Answers with the scripted statuses in order, then 200. Counts calls.
pub(crate) struct ScriptedUpstream {
    statuses: Mutex<VecDeque<u16>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedUpstream {
    pub(crate) fn new(statuses: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                statuses: Mutex::new(statuses.into()),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Upstream for ScriptedUpstream {
    fn forward<'a>(
        &'a self,
        _server: &'a Server,
        _req: Request<Body>,
        _pass_host_header: bool,
    ) -> BoxFuture<'a, Result<Response<Body>, UpstreamError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
        Box::pin(async move {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::from_u16(status).unwrap();
            Ok(response)
        })
    }
}

pub(crate) fn single_server_spec(url: &str) -> LoadBalancerSpec {
    LoadBalancerSpec {
        servers: vec![ServerSpec {
            url: url.to_string(),
            weight: 1,
        }],
        strategy: Strategy::RoundRobin,
        pass_host_header: true,
        health_check: None,
    }
}

impl ServiceHandle {
    pub(crate) fn echo() -> Self {
        Self::from_upstream("echo", Arc::new(EchoUpstream))
    }

    pub(crate) fn scripted(statuses: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
        let (upstream, calls) = ScriptedUpstream::new(statuses);
        (Self::from_upstream("scripted", Arc::new(upstream)), calls)
    }

    pub(crate) fn from_upstream(name: &str, upstream: Arc<dyn Upstream>) -> Self {
        let pool = ServerPool::new(name, single_server_spec("http://127.0.0.1:9"), upstream).unwrap();
        ServiceHandle::LoadBalanced(Arc::new(pool))
    }
}
