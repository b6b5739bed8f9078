//! Static configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that every enabled feature has what it needs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Dynamic configuration is validated per entry by the pipeline, not here

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single static configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no entry points configured")]
    NoEntryPoints,

    #[error("entry point {name:?} has invalid address {address:?}")]
    InvalidAddress { name: String, address: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("admin API is enabled but admin.api_key is empty")]
    MissingApiKey,

    #[error("{field} is not a valid socket address: {value:?}")]
    InvalidBind { field: &'static str, value: String },

    #[error("file provider path is empty")]
    EmptyProviderPath,

    #[error("timeouts.total_secs must not be shorter than timeouts.request_secs")]
    TotalTimeoutTooShort,

    #[error("tls certificate entry has an empty cert_file or key_file")]
    EmptyCertificatePath,
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.entry_points.is_empty() {
        errors.push(ValidationError::NoEntryPoints);
    }
    for (name, ep) in &config.entry_points {
        if ep.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                name: name.clone(),
                address: ep.address.clone(),
            });
        }
    }

    if config.providers.debounce_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "providers.debounce_ms",
        });
    }
    if config.pipeline.build_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "pipeline.build_timeout_ms",
        });
    }
    if config.health.enabled && config.health.tick_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "health.tick_ms",
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }
    if config.timeouts.total_secs < config.timeouts.request_secs {
        errors.push(ValidationError::TotalTimeoutTooShort);
    }
    for cert in &config.tls.certificates {
        if cert.cert_file.as_os_str().is_empty() || cert.key_file.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyCertificatePath);
        }
    }

    if let Some(file) = &config.providers.file {
        if file.path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyProviderPath);
        }
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBind {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidBind {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EntryPointConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.entry_points.insert(
            "broken".into(),
            EntryPointConfig {
                address: "not-an-address".into(),
            },
        );
        config.providers.debounce_ms = 0;
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::MissingApiKey));
        assert!(errors.contains(&ValidationError::Zero {
            field: "providers.debounce_ms"
        }));
    }

    #[test]
    fn total_timeout_covers_one_attempt() {
        let mut config = ProxyConfig::default();
        config.timeouts.request_secs = 30;
        config.timeouts.total_secs = 10;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::TotalTimeoutTooShort]);
    }

    #[test]
    fn empty_entry_points_rejected() {
        let mut config = ProxyConfig::default();
        config.entry_points.clear();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoEntryPoints]);
    }
}
