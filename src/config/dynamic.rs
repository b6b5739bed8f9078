//! Dynamic configuration model.
//!
//! This is the shape providers emit and the admin API reports. It is
//! serializable as JSON, YAML or TOML with camelCase keys:
//!
//! ```text
//! routers:     name → { rule, service, middlewares[], priority, entryPoints[], tls }
//! services:    name → { loadBalancer | weighted | mirroring }
//! middlewares: name → { <type>: { params } }
//! tlsOptions:  name → { minVersion, sniStrict, alpnProtocols[] }
//! ```
//!
//! All maps are `BTreeMap` so that serialization (and therefore the content
//! hash the builder compares) does not depend on insertion order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag of the structural middleware that groups other middlewares.
pub const CHAIN_MIDDLEWARE: &str = "chain";

/// A complete dynamic configuration (one provider's view, or the merged view).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    pub routers: BTreeMap<String, RouterSpec>,
    pub services: BTreeMap<String, ServiceSpec>,
    pub middlewares: BTreeMap<String, MiddlewareSpec>,
    pub tls_options: BTreeMap<String, TlsOptionSpec>,
}

/// Router definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Matching rule, e.g. ``Host(`a.example`) && PathPrefix(`/api`)``.
    pub rule: String,

    /// Service the router forwards to.
    pub service: String,

    /// Middlewares applied in order before the service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,

    /// Higher priority is matched first. Must not be negative.
    #[serde(default)]
    pub priority: i64,

    /// Entry points the router is bound to (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
}

/// Router TLS section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterTls {
    /// Name of the TLS options entry to apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

/// Service definition: a leaf load balancer or a composite over other services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceSpec {
    LoadBalancer(LoadBalancerSpec),
    Weighted(WeightedSpec),
    Mirroring(MirroringSpec),
}

impl ServiceSpec {
    /// Names of the services this one references (empty for leaves).
    pub fn references(&self) -> Vec<&str> {
        match self {
            ServiceSpec::LoadBalancer(_) => Vec::new(),
            ServiceSpec::Weighted(w) => w.services.iter().map(|s| s.name.as_str()).collect(),
            ServiceSpec::Mirroring(m) => std::iter::once(m.service.as_str())
                .chain(m.mirrors.iter().map(|m| m.name.as_str()))
                .collect(),
        }
    }

    /// Short type label used in logs and the admin API.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceSpec::LoadBalancer(_) => "loadBalancer",
            ServiceSpec::Weighted(_) => "weighted",
            ServiceSpec::Mirroring(_) => "mirroring",
        }
    }
}

/// Leaf service backed by concrete servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    pub servers: Vec<ServerSpec>,

    #[serde(default)]
    pub strategy: Strategy,

    /// Forward the client's Host header instead of the server's authority.
    #[serde(default = "default_true")]
    pub pass_host_header: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

/// A single backend server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Server URL, e.g. `http://10.0.0.1:8080`.
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Server selection strategy for a leaf service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    RoundRobin,
    #[default]
    WeightedRoundRobin,
    LeastConnections,
}

/// Active (and optional passive) health checking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckSpec {
    /// Path probed on each server.
    pub path: String,

    /// Seconds between probe rounds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Consecutive successful probes before a server is marked healthy.
    pub healthy_threshold: u32,

    /// Consecutive failed probes before a server is marked unhealthy.
    pub unhealthy_threshold: u32,

    /// Consecutive failed proxied requests before a server is marked
    /// unhealthy. `None` disables passive checking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passive_failure_threshold: Option<u32>,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            passive_failure_threshold: None,
        }
    }
}

/// Weighted composite: picks one child per request at random, by weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedSpec {
    pub services: Vec<WeightedRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedRef {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Mirroring composite: serves from `service`, copies traffic to mirrors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroringSpec {
    pub service: String,

    #[serde(default)]
    pub mirrors: Vec<MirrorRef>,

    /// Largest request body (bytes) that is buffered for mirroring.
    #[serde(default = "default_mirror_body")]
    pub max_body_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorRef {
    pub name: String,

    /// Share of requests copied to this mirror, 0..=100.
    pub percent: u32,
}

/// Middleware definition: a type tag plus type-specific parameters.
///
/// On the wire this is a single-key object, `{ "stripPrefix": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, Value>"
)]
pub struct MiddlewareSpec {
    pub kind: String,
    pub params: Value,
}

impl MiddlewareSpec {
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// Members of a `chain` middleware, `None` for every other type.
    ///
    /// Malformed member lists yield an empty list; the registry's schema
    /// check reports them.
    pub fn chain_members(&self) -> Option<Vec<String>> {
        if self.kind != CHAIN_MIDDLEWARE {
            return None;
        }
        let members = self
            .params
            .get("middlewares")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Some(members)
    }
}

impl TryFrom<BTreeMap<String, Value>> for MiddlewareSpec {
    type Error = String;

    fn try_from(map: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "middleware must have exactly one type key, found {}",
                map.len()
            ));
        }
        let (kind, params) = map
            .into_iter()
            .next()
            .ok_or_else(|| "middleware type key missing".to_string())?;
        Ok(Self { kind, params })
    }
}

impl From<MiddlewareSpec> for BTreeMap<String, Value> {
    fn from(spec: MiddlewareSpec) -> Self {
        let mut map = BTreeMap::new();
        map.insert(spec.kind, spec.params);
        map
    }
}

/// TLS options referenced by routers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsOptionSpec {
    /// `VersionTLS12` or `VersionTLS13`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    /// Refuse handshakes whose SNI matches no certificate.
    pub sni_strict: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn_protocols: Vec<String>,
}

/// Kind of configuration entry an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    Router,
    Service,
    Middleware,
    TlsOption,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Router => "router",
            EntryKind::Service => "service",
            EntryKind::Middleware => "middleware",
            EntryKind::TlsOption => "tls option",
        };
        f.write_str(s)
    }
}

/// A problem with a single configuration entry.
///
/// Entry errors never abort processing; the entry is excised and the error
/// travels with the configuration so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EntryError {
    pub kind: EntryKind,
    pub name: String,
    pub message: String,
}

impl EntryError {
    pub fn new(kind: EntryKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: {}", self.kind, self.name, self.message)
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

fn default_mirror_body() -> u64 {
    1024 * 1024
}
