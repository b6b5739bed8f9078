//! Upstream forwarding over a pooled hyper client.
//!
//! # Responsibilities
//! - Rewrite the request URI to the selected server
//! - Set `X-Forwarded-For`, `X-Forwarded-Host` and `X-Forwarded-Proto`
//! - Honour `passHostHeader`
//! - Strip hop-by-hop headers in both directions
//! - Enforce the per-request timeout (504) and map transport errors (502)

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::response::strip_hop_by_hop;
use crate::load_balancer::{Server, Upstream, UpstreamError};
use crate::middleware::BoxFuture;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// `Upstream` that sends requests over HTTP/1.1 with connection pooling.
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            timeout: request_timeout,
        }
    }
}

impl Upstream for HttpForwarder {
    fn forward<'a>(
        &'a self,
        server: &'a Server,
        req: Request<Body>,
        pass_host_header: bool,
    ) -> BoxFuture<'a, Result<Response<Body>, UpstreamError>> {
        Box::pin(async move {
            let req = prepare(server, req, pass_host_header)?;
            match tokio::time::timeout(self.timeout, self.client.request(req)).await {
                Ok(Ok(response)) => {
                    let (mut parts, body): (_, hyper::body::Incoming) = response.into_parts();
                    strip_hop_by_hop(&mut parts.headers);
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Ok(Err(e)) => {
                    tracing::debug!(server = %server.url, error = %e, "Upstream transport error");
                    Err(UpstreamError::Transport(e.to_string()))
                }
                Err(_) => {
                    tracing::debug!(server = %server.url, timeout = ?self.timeout, "Upstream timed out");
                    Err(UpstreamError::Timeout)
                }
            }
        })
    }
}

/// Turn a client request into the request sent to `server`.
pub fn prepare(
    server: &Server,
    req: Request<Body>,
    pass_host_header: bool,
) -> Result<Request<Body>, UpstreamError> {
    let (mut parts, body) = req.into_parts();

    let original_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
    let proto = parts
        .headers
        .get(X_FORWARDED_PROTO)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_static(if parts.uri.scheme_str() == Some("https") {
                "https"
            } else {
                "http"
            })
        });
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    strip_hop_by_hop(&mut parts.headers);

    if let Some(ip) = client_ip {
        let forwarded_for = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(previous) => format!("{}, {}", previous, ip),
            None => ip,
        };
        let value = HeaderValue::from_str(&forwarded_for)
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        parts.headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = &original_host {
        parts.headers.insert(X_FORWARDED_HOST, host.clone());
    }
    parts.headers.insert(X_FORWARDED_PROTO, proto);

    if pass_host_header {
        if let Some(host) = original_host {
            parts.headers.insert(header::HOST, host);
        }
    } else {
        // The client fills Host from the rewritten URI.
        parts.headers.remove(header::HOST);
    }

    parts.uri = upstream_uri(server, &parts.uri)?;
    parts.version = Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}

/// `server`'s URL joined with the request's path and query.
fn upstream_uri(server: &Server, uri: &Uri) -> Result<Uri, UpstreamError> {
    let base_path = server.url.path().trim_end_matches('/');
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let authority = &server.url[url::Position::BeforeHost..url::Position::AfterPort];

    Uri::builder()
        .scheme(server.url.scheme())
        .authority(authority)
        .path_and_query(format!("{}{}", base_path, path_and_query))
        .build()
        .map_err(|e| UpstreamError::Request(e.to_string()))
}
