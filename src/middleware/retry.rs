//! Retry with exponential backoff.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use rand::Rng;
use serde::Deserialize;

use crate::http::response;
use crate::middleware::registry::MiddlewareConfig;
use crate::middleware::{buffer_body, content_length, replay_request, BoxFuture, BufferedBody, Middleware, Next};

/// Largest request body buffered for replay. Larger requests are sent once.
pub const MAX_REPLAY_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,

    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
}

fn default_initial_interval() -> u64 {
    100
}

fn default_max_interval() -> u64 {
    2000
}

impl MiddlewareConfig for RetryConfig {
    fn check(&self) -> Result<(), String> {
        if self.attempts == 0 {
            return Err("attempts must be at least 1".to_string());
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err("maxIntervalMs must not be below initialIntervalMs".to_string());
        }
        Ok(())
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter: 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Re-sends the request while downstream answers 502, 503 or 504.
#[derive(Debug)]
pub struct Retry {
    name: String,
    attempts: u32,
    initial_ms: u64,
    max_ms: u64,
}

impl Retry {
    pub fn new(name: &str, config: RetryConfig) -> Self {
        Self {
            name: name.to_string(),
            attempts: config.attempts,
            initial_ms: config.initial_interval_ms,
            max_ms: config.max_interval_ms,
        }
    }
}

impl Middleware for Retry {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response<Body>> {
        let replayable = content_length(&req).map_or(true, |len| len <= MAX_REPLAY_BODY as u64);
        if self.attempts <= 1 || !replayable {
            return next.run(req);
        }
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match buffer_body(body, MAX_REPLAY_BODY).await {
                Ok(BufferedBody::Complete(body)) => body,
                Ok(BufferedBody::Overflow(body)) => {
                    tracing::debug!(middleware = %self.name, "Body too large to replay, sending once");
                    return next.run(Request::from_parts(parts, body)).await;
                }
                Err(e) => {
                    tracing::debug!(middleware = %self.name, error = %e, "Cannot read request body");
                    return response::bad_request();
                }
            };

            let mut attempt = 0;
            loop {
                let response = next.run(replay_request(&parts, &body)).await;
                attempt += 1;
                if attempt >= self.attempts || !response::is_upstream_failure(response.status()) {
                    return response;
                }
                let delay = calculate_backoff(attempt, self.initial_ms, self.max_ms);
                tracing::debug!(
                    middleware = %self.name,
                    attempt,
                    status = %response.status(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
            }
        })
    }
}
