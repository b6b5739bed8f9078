//! Static configuration schema.
//!
//! This is the process-level configuration read once at startup: entry
//! points, providers, pipeline tuning, admin and observability settings.
//! Routing itself lives in the dynamic configuration (see `dynamic.rs`)
//! that providers emit at runtime.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::dynamic::Configuration;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listening addresses, by entry point name.
    pub entry_points: BTreeMap<String, EntryPointConfig>,

    /// Configuration sources.
    pub providers: ProvidersConfig,

    /// Build/publish tuning.
    pub pipeline: PipelineConfig,

    /// Health monitor settings.
    pub health: HealthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only introspection API.
    pub admin: AdminConfig,

    /// Certificates loaded at startup.
    pub tls: TlsConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut entry_points = BTreeMap::new();
        entry_points.insert("web".to_string(), EntryPointConfig::default());
        Self {
            entry_points,
            providers: ProvidersConfig::default(),
            pipeline: PipelineConfig::default(),
            health: HealthConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Entry point names in lexical order.
    pub fn entry_point_names(&self) -> Vec<String> {
        self.entry_points.keys().cloned().collect()
    }
}

/// A listening address.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryPointConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// How two providers claiming the same qualified name are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Drop every claim and report each one.
    #[default]
    Reject,
    /// Keep the claim of the lexically first provider, report the rest.
    FirstProvider,
}

/// Provider and aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Quiet period after the last fragment before a merge is emitted.
    pub debounce_ms: u64,

    pub conflict_policy: ConflictPolicy,

    /// File provider, if configured.
    pub file: Option<FileProviderConfig>,

    /// Dynamic configuration embedded in this file.
    pub inline: Option<Configuration>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            conflict_policy: ConflictPolicy::default(),
            file: None,
            inline: None,
        }
    }
}

/// File provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    /// Path to the dynamic configuration file (.toml, .json, .yaml, .yml).
    pub path: PathBuf,

    /// Re-read the file when it changes.
    #[serde(default = "default_true")]
    pub watch: bool,
}

/// Build and publish settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// A build taking longer than this is abandoned and the current graph kept.
    pub build_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_timeout_ms: 2_000,
        }
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// How often the monitor looks for services whose probe round is due.
    pub tick_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: 500,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream request timeout (one attempt, request/response) in seconds.
    pub request_secs: u64,

    /// Overall budget for a client request, including retries, in seconds.
    pub total_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            total_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Static TLS material.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub certificates: Vec<CertificateFileConfig>,
}

/// A PEM certificate/key pair and the SNI names it serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateFileConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,

    /// Host names, `*.example.com` wildcards allowed. Empty makes this the
    /// default certificate.
    #[serde(default)]
    pub names: Vec<String>,
}

fn default_true() -> bool {
    true
}
