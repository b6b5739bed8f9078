//! Request and response rewriting middlewares.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use serde::Deserialize;

use crate::http::response;
use crate::middleware::registry::MiddlewareConfig;
use crate::middleware::{set_path, BoxFuture, Middleware, Next};
use crate::routing::request_host;

/// Header carrying the prefix removed by `stripPrefix`.
pub const FORWARDED_PREFIX: &str = "x-forwarded-prefix";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddPrefixConfig {
    pub prefix: String,
}

impl MiddlewareConfig for AddPrefixConfig {
    fn check(&self) -> Result<(), String> {
        if !self.prefix.starts_with('/') {
            return Err(format!("prefix {:?} must start with '/'", self.prefix));
        }
        Ok(())
    }
}

/// Prepends a fixed prefix to the request path.
#[derive(Debug)]
pub struct AddPrefix {
    name: String,
    prefix: String,
}

impl AddPrefix {
    pub fn new(name: &str, config: AddPrefixConfig) -> Self {
        Self {
            name: name.to_string(),
            prefix: config.prefix.trim_end_matches('/').to_string(),
        }
    }
}

impl Middleware for AddPrefix {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        let path = format!("{}{}", self.prefix, req.uri().path());
        if let Err(e) = set_path(&mut req, &path) {
            tracing::warn!(middleware = %self.name, error = %e, "Cannot rewrite path");
            return Box::pin(async { response::bad_request() });
        }
        next.run(req)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripPrefixConfig {
    pub prefixes: Vec<String>,
}

impl MiddlewareConfig for StripPrefixConfig {
    fn check(&self) -> Result<(), String> {
        if self.prefixes.is_empty() {
            return Err("at least one prefix is required".to_string());
        }
        match self.prefixes.iter().find(|p| !p.starts_with('/')) {
            Some(bad) => Err(format!("prefix {:?} must start with '/'", bad)),
            None => Ok(()),
        }
    }
}

/// Removes the first matching prefix from the request path.
#[derive(Debug)]
pub struct StripPrefix {
    name: String,
    prefixes: Vec<String>,
}

impl StripPrefix {
    pub fn new(name: &str, config: StripPrefixConfig) -> Self {
        Self {
            name: name.to_string(),
            prefixes: config.prefixes,
        }
    }

    fn strip<'p>(&self, path: &'p str) -> Option<(&str, &'p str)> {
        self.prefixes.iter().find_map(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            let rest = path.strip_prefix(prefix)?;
            // Only strip on a segment boundary.
            if rest.is_empty() || rest.starts_with('/') || prefix.is_empty() {
                Some((prefix, rest))
            } else {
                None
            }
        })
    }
}

impl Middleware for StripPrefix {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        let original = req.uri().path().to_string();
        if let Some((prefix, rest)) = self.strip(&original) {
            let path = if rest.is_empty() { "/" } else { rest };
            if let Err(e) = set_path(&mut req, path) {
                tracing::warn!(middleware = %self.name, error = %e, "Cannot rewrite path");
                return Box::pin(async { response::bad_request() });
            }
            if let Ok(value) = HeaderValue::from_str(prefix) {
                req.headers_mut().insert(FORWARDED_PREFIX, value);
            }
        }
        next.run(req)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HeadersConfig {
    /// Set on the request; an empty value removes the header.
    #[serde(default)]
    pub custom_request_headers: BTreeMap<String, String>,

    /// Set on the response; an empty value removes the header.
    #[serde(default)]
    pub custom_response_headers: BTreeMap<String, String>,
}

impl MiddlewareConfig for HeadersConfig {
    fn check(&self) -> Result<(), String> {
        compile_headers(&self.custom_request_headers)?;
        compile_headers(&self.custom_response_headers)?;
        Ok(())
    }
}

type HeaderEdits = Vec<(HeaderName, Option<HeaderValue>)>;

fn compile_headers(headers: &BTreeMap<String, String>) -> Result<HeaderEdits, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name {:?}", name))?;
            let value = if value.is_empty() {
                None
            } else {
                Some(
                    HeaderValue::from_str(value)
                        .map_err(|_| format!("invalid value for header {}", name))?,
                )
            };
            Ok((name, value))
        })
        .collect()
}

fn apply_edits(headers: &mut HeaderMap, edits: &HeaderEdits) {
    for (name, value) in edits {
        match value {
            Some(value) => {
                headers.insert(name.clone(), value.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
}

/// Sets or removes request and response headers.
#[derive(Debug)]
pub struct Headers {
    request: HeaderEdits,
    response: HeaderEdits,
}

impl Headers {
    pub fn new(_name: &str, config: HeadersConfig) -> Self {
        // Already checked by the registry.
        Self {
            request: compile_headers(&config.custom_request_headers).unwrap_or_default(),
            response: compile_headers(&config.custom_response_headers).unwrap_or_default(),
        }
    }
}

impl Middleware for Headers {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        apply_edits(req.headers_mut(), &self.request);
        Box::pin(async move {
            let mut response = next.run(req).await;
            apply_edits(response.headers_mut(), &self.response);
            response
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectSchemeConfig {
    pub scheme: String,

    #[serde(default)]
    pub permanent: bool,

    #[serde(default)]
    pub port: Option<u16>,
}

impl MiddlewareConfig for RedirectSchemeConfig {
    fn check(&self) -> Result<(), String> {
        match self.scheme.as_str() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported scheme {:?}", other)),
        }
    }
}

/// Redirects requests that did not arrive over the configured scheme.
#[derive(Debug)]
pub struct RedirectScheme {
    name: String,
    scheme: String,
    permanent: bool,
    port: Option<u16>,
}

impl RedirectScheme {
    pub fn new(name: &str, config: RedirectSchemeConfig) -> Self {
        Self {
            name: name.to_string(),
            scheme: config.scheme,
            permanent: config.permanent,
            port: config.port,
        }
    }

    fn location(&self, req: &Request<Body>) -> Option<String> {
        let host = request_host(req)?;
        let port = match self.port {
            Some(port) if !is_default_port(&self.scheme, port) => format!(":{}", port),
            _ => String::new(),
        };
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Some(format!("{}://{}{}{}", self.scheme, host, port, path))
    }
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Scheme the client used, as far as the router can tell.
fn incoming_scheme(req: &Request<Body>) -> String {
    if let Some(scheme) = req.uri().scheme_str() {
        return scheme.to_ascii_lowercase();
    }
    req.headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "http".to_string())
}

impl Middleware for RedirectScheme {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        if incoming_scheme(&req) == self.scheme {
            return next.run(req);
        }
        let Some(location) = self.location(&req) else {
            tracing::debug!(middleware = %self.name, "No host to redirect to");
            return Box::pin(async { response::bad_request() });
        };
        let status = if self.permanent {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::FOUND
        };
        Box::pin(async move {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers_mut().insert(header::LOCATION, value);
            }
            response
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::load_balancer::ServiceHandle;
    use crate::middleware::Chain;
    use std::sync::Arc;

    /// Run `middleware` in front of a service that echoes the path it saw.
    pub(crate) async fn run(middleware: Arc<dyn Middleware>, req: Request<Body>) -> Response<Body> {
        let chain = Chain::new(vec![middleware], Arc::new(ServiceHandle::echo()));
        chain.handle(req).await
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap()
    }

    fn seen_path(response: &Response<Body>) -> &str {
        response.headers()["x-echo-path"].to_str().unwrap()
    }

    #[tokio::test]
    async fn add_prefix() {
        let m = Arc::new(AddPrefix::new(
            "m",
            AddPrefixConfig {
                prefix: "/v1/".to_string(),
            },
        ));
        let response = run(m, get("/users?x=1")).await;
        assert_eq!(seen_path(&response), "/v1/users?x=1");
    }

    #[tokio::test]
    async fn strip_prefix_on_segment_boundary() {
        let m: Arc<dyn Middleware> = Arc::new(StripPrefix::new(
            "m",
            StripPrefixConfig {
                prefixes: vec!["/api".to_string()],
            },
        ));
        let response = run(m.clone(), get("/api/users")).await;
        assert_eq!(seen_path(&response), "/users");

        let response = run(m.clone(), get("/api")).await;
        assert_eq!(seen_path(&response), "/");

        let response = run(m, get("/apiary")).await;
        assert_eq!(seen_path(&response), "/apiary");
    }

    #[tokio::test]
    async fn headers_set_and_remove() {
        let config = HeadersConfig {
            custom_request_headers: BTreeMap::from([("x-added".to_string(), "yes".to_string())]),
            custom_response_headers: BTreeMap::from([
                ("x-frame-options".to_string(), "DENY".to_string()),
                ("x-echo-path".to_string(), String::new()),
            ]),
        };
        assert!(config.check().is_ok());
        let m = Arc::new(Headers::new("m", config));
        let response = run(m, get("/")).await;
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-echo-x-added"], "yes");
        assert!(response.headers().get("x-echo-path").is_none());
    }

    #[test]
    fn headers_config_rejects_invalid_names() {
        let config = HeadersConfig {
            custom_request_headers: BTreeMap::from([("bad header".to_string(), "v".to_string())]),
            ..Default::default()
        };
        assert!(config.check().is_err());
    }

    #[tokio::test]
    async fn redirect_scheme() {
        let m: Arc<dyn Middleware> = Arc::new(RedirectScheme::new(
            "m",
            RedirectSchemeConfig {
                scheme: "https".to_string(),
                permanent: true,
                port: Some(8443),
            },
        ));
        let response = run(m.clone(), get("/a?b=c")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com:8443/a?b=c"
        );

        let req = Request::builder()
            .uri("/a")
            .header("host", "example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        let response = run(m, req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
