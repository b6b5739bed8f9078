//! Response handling and transformation.
//!
//! # Responsibilities
//! - Build the router's own error responses (404, 429, 502, 503, 504)
//! - Strip hop-by-hop headers from upstream responses
//!
//! # Design Decisions
//! - Upstream bodies are streamed through, never buffered here
//! - Upstream timeouts result in 504 Gateway Timeout

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Response, StatusCode};

/// Hop-by-hop headers (RFC 9110 §7.6.1) that must not be forwarded.
pub const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Plain-text response with the given status.
pub fn error_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn not_found() -> Response<Body> {
    error_response(StatusCode::NOT_FOUND, "404 page not found")
}

pub fn service_unavailable() -> Response<Body> {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
}

pub fn bad_gateway() -> Response<Body> {
    error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

pub fn gateway_timeout() -> Response<Body> {
    error_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
}

pub fn bad_request() -> Response<Body> {
    error_response(StatusCode::BAD_REQUEST, "Bad Request")
}

pub fn too_many_requests() -> Response<Body> {
    error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
}

/// True for upstream statuses that count as a server failure.
pub fn is_upstream_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Remove hop-by-hop headers, including those named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}
