//! Request identification.
//!
//! # Responsibilities
//! - Generate a UUID v4 request ID when the client sent none
//! - Expose the ID to handlers and logs
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - A client-supplied `x-request-id` is kept as is

use axum::http::{HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// `MakeRequestId` producing random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request ID of `req`, if it has one.
pub fn request_id<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn generates_distinct_uuids() {
        let req = Request::new(Body::empty());
        let mut make = MakeRequestUuid;
        let a = make.make_request_id(&req).unwrap();
        let b = make.make_request_id(&req).unwrap();
        assert_ne!(a.header_value(), b.header_value());
        let parsed = uuid::Uuid::parse_str(a.header_value().to_str().unwrap()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn reads_request_id_header() {
        let req = Request::builder()
            .header(X_REQUEST_ID, "abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_id(&req), Some("abc"));
        assert_eq!(request_id(&Request::new(Body::empty())), None);
    }
}
