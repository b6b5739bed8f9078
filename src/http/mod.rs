//! HTTP transport glue.
//!
//! # Data Flow
//! ```text
//! TCP connection on an entry point
//!     → server.rs (axum, request ID, tracing, overall timeout)
//!     → LiveGraph::dispatch (route match, middleware chain, service)
//!     → forward.rs (pooled hyper client to the selected server)
//!     → response.rs (hop-by-hop stripping, router error responses)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::HttpForwarder;
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::HttpServer;
