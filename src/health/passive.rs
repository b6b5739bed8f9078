//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe proxied request outcomes
//! - Mark a server unhealthy after consecutive failures
//!
//! # Design Decisions
//! - Transport errors, timeouts, 502, 503 and 504 count as failures
//! - Other statuses, 4xx and 500 included, count as success
//! - Passive checks only mark servers down; probes bring them back

use axum::body::Body;
use axum::http::Response;

use crate::health::state::HealthState;
use crate::http::response::is_upstream_failure;
use crate::load_balancer::server::Server;
use crate::load_balancer::UpstreamError;

/// Whether an upstream outcome counts as a failure of the server.
pub fn is_failure(outcome: &Result<Response<Body>, UpstreamError>) -> bool {
    match outcome {
        Ok(response) => is_upstream_failure(response.status()),
        Err(_) => true,
    }
}

/// Feed a request outcome into the server's passive counter.
pub fn observe(
    service: &str,
    server: &Server,
    failure_threshold: u32,
    outcome: &Result<Response<Body>, UpstreamError>,
) -> Option<HealthState> {
    let failed = is_failure(outcome);
    let transition = server.health().record_request(!failed, failure_threshold);
    if let Some(state) = transition {
        tracing::warn!(
            service,
            server = %server.url,
            state = ?state,
            "Server marked unhealthy after consecutive request failures"
        );
    }
    transition
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status(code: StatusCode) -> Result<Response<Body>, UpstreamError> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = code;
        Ok(response)
    }

    #[test]
    fn classifies_outcomes() {
        assert!(is_failure(&Err(UpstreamError::Timeout)));
        assert!(is_failure(&status(StatusCode::BAD_GATEWAY)));
        assert!(!is_failure(&status(StatusCode::NOT_FOUND)));
        assert!(!is_failure(&status(StatusCode::INTERNAL_SERVER_ERROR)));
    }

    #[test]
    fn threshold_marks_down() {
        let server = Server::new("http://127.0.0.1:1", 1).unwrap();
        let failure = Err(UpstreamError::Transport("refused".to_string()));
        assert_eq!(observe("svc", &server, 2, &failure), None);
        assert_eq!(
            observe("svc", &server, 2, &failure),
            Some(HealthState::Unhealthy)
        );
    }
}
