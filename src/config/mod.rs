//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! static file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable, read once at startup)
//!
//! dynamic configuration (TOML/JSON/YAML, per provider)
//!     → dynamic.rs model, emitted by providers as fragments
//!     → pipeline (aggregate, validate per entry, build, switch)
//! ```
//!
//! # Design Decisions
//! - Static config is immutable once loaded; routing changes arrive as dynamic config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod dynamic;
pub mod loader;
pub mod schema;
pub mod validation;

pub use dynamic::{
    Configuration, EntryError, EntryKind, HealthCheckSpec, LoadBalancerSpec, MiddlewareSpec,
    RouterSpec, ServerSpec, ServiceSpec, Strategy, TlsOptionSpec,
};
pub use schema::{
    AdminConfig, CertificateFileConfig, ConflictPolicy, EntryPointConfig, HealthConfig, ObservabilityConfig,
    PipelineConfig, ProvidersConfig, ProxyConfig, TimeoutConfig, TlsConfig,
};
