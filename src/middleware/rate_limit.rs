//! Per-client token bucket rate limiting.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use dashmap::DashMap;
use serde::Deserialize;

use crate::http::response;
use crate::middleware::registry::MiddlewareConfig;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::observability::metrics;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client.
    pub average: u32,

    /// Bucket capacity. Defaults to `average`.
    #[serde(default)]
    pub burst: Option<u32>,
}

impl MiddlewareConfig for RateLimitConfig {
    fn check(&self) -> Result<(), String> {
        if self.average == 0 {
            return Err("average must be greater than zero".to_string());
        }
        if self.burst == Some(0) {
            return Err("burst must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Limits each client IP to `average` requests per second, with bursts.
///
/// Buckets belong to the compiled instance, so a rebuild starts fresh.
#[derive(Debug)]
pub struct RateLimit {
    name: String,
    rate: f64,
    burst: f64,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimit {
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        Self {
            name: name.to_string(),
            rate: config.average as f64,
            burst: config.burst.unwrap_or(config.average) as f64,
            buckets: DashMap::new(),
        }
    }

    fn check(&self, key: &str) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rate)
    }
}

fn client_key(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl Middleware for RateLimit {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        let key = client_key(&req);
        if self.check(&key) {
            return next.run(req);
        }
        tracing::warn!(middleware = %self.name, client = %key, "Rate limit exceeded");
        metrics::record_rate_limited(&self.name);
        Box::pin(async { response::too_many_requests() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::builtin::tests::run;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn from(ip: &str) -> Request<Body> {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{}:5000", ip).parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[tokio::test]
    async fn limits_per_client() {
        let m: Arc<dyn Middleware> = Arc::new(RateLimit::new(
            "limit",
            RateLimitConfig {
                average: 1,
                burst: Some(2),
            },
        ));

        assert_eq!(run(m.clone(), from("10.0.0.1")).await.status(), StatusCode::OK);
        assert_eq!(run(m.clone(), from("10.0.0.1")).await.status(), StatusCode::OK);
        assert_eq!(
            run(m.clone(), from("10.0.0.1")).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        // Another client has its own bucket.
        assert_eq!(run(m, from("10.0.0.2")).await.status(), StatusCode::OK);
    }

    #[test]
    fn zero_rate_is_invalid() {
        let config = RateLimitConfig {
            average: 0,
            burst: None,
        };
        assert!(config.check().is_err());
    }
}
