//! Dynamic edge router: provider fragments in, live routing graph out.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod provider;
pub mod routing;
pub mod tls;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Running, Shutdown, Startup};
pub use pipeline::{LiveGraph, Switch};
