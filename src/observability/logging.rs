//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` overrides the configured level when set

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Default filter for a configured level, applied to this crate and to
/// tower-http.
pub fn default_filter(log_level: &str) -> String {
    format!("edge_router={level},tower_http={level}", level = log_level)
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
