//! Per-entry validation of candidate configurations.
//!
//! # Responsibilities
//! - Check every router, service, middleware and TLS option on its own
//! - Excise invalid entries and report one `EntryError` per entry
//! - Propagate invalidity along references (a router pointing at an invalid
//!   service is itself invalid)
//! - Fingerprint the result for change detection
//!
//! # Design Decisions
//! - Validation never fails as a whole; it only removes entries
//! - Reference cycles are found by depth-first search with a visiting set;
//!   only the services or chains on the cycle are marked as cycle members

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use url::Url;

use crate::config::dynamic::{
    Configuration, EntryError, EntryKind, HealthCheckSpec, MiddlewareSpec, RouterSpec,
    ServiceSpec, Strategy, TlsOptionSpec,
};
use crate::middleware::MiddlewareRegistry;
use crate::pipeline::aggregator::CandidateConfiguration;
use crate::routing::Rule;

/// TLS versions accepted in `minVersion`.
pub const TLS_VERSIONS: [&str; 2] = ["VersionTLS12", "VersionTLS13"];

/// Configuration with every invalid entry removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfiguration {
    pub configuration: Configuration,
    pub errors: Vec<EntryError>,
    /// Fingerprint of `configuration` and `errors`.
    pub content_hash: u64,
}

impl ValidatedConfiguration {
    pub fn new(configuration: Configuration, mut errors: Vec<EntryError>) -> Self {
        errors.sort();
        errors.dedup();
        let content_hash = content_hash(&configuration, &errors);
        Self {
            configuration,
            errors,
            content_hash,
        }
    }
}

/// Stable fingerprint of a configuration and its errors.
pub fn content_hash(configuration: &Configuration, errors: &[EntryError]) -> u64 {
    let mut hasher = DefaultHasher::new();
    // BTreeMaps serialize in key order, so the bytes are stable.
    serde_json::to_vec(configuration)
        .unwrap_or_default()
        .hash(&mut hasher);
    serde_json::to_vec(errors).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

pub struct Validator {
    registry: Arc<MiddlewareRegistry>,
    entry_points: BTreeSet<String>,
}

impl Validator {
    pub fn new(registry: Arc<MiddlewareRegistry>, entry_points: impl IntoIterator<Item = String>) -> Self {
        Self {
            registry,
            entry_points: entry_points.into_iter().collect(),
        }
    }

    pub fn validate(&self, candidate: CandidateConfiguration) -> ValidatedConfiguration {
        let CandidateConfiguration {
            configuration,
            conflicts,
            ..
        } = candidate;
        let mut errors = conflicts;

        let tls_options = check_tls_options(configuration.tls_options, &mut errors);
        let services = check_services(configuration.services, &mut errors);
        let middlewares = self.check_middlewares(configuration.middlewares, &mut errors);

        let mut routers = BTreeMap::new();
        for (name, router) in configuration.routers {
            match self.check_router(&router, &services, &middlewares, &tls_options) {
                Ok(()) => {
                    routers.insert(name, router);
                }
                Err(message) => errors.push(EntryError::new(EntryKind::Router, name, message)),
            }
        }

        for error in &errors {
            tracing::warn!(kind = %error.kind, name = %error.name, error = %error.message, "Configuration entry excised");
        }

        ValidatedConfiguration::new(
            Configuration {
                routers,
                services,
                middlewares,
                tls_options,
            },
            errors,
        )
    }

    fn check_router(
        &self,
        router: &RouterSpec,
        services: &BTreeMap<String, ServiceSpec>,
        middlewares: &BTreeMap<String, MiddlewareSpec>,
        tls_options: &BTreeMap<String, TlsOptionSpec>,
    ) -> Result<(), String> {
        Rule::parse(&router.rule).map_err(|e| format!("invalid rule: {}", e))?;
        if router.priority < 0 {
            return Err(format!("priority {} is negative", router.priority));
        }
        if !services.contains_key(&router.service) {
            return Err(format!(
                "service {:?} does not exist or is invalid",
                router.service
            ));
        }
        if let Some(missing) = router
            .middlewares
            .iter()
            .find(|m| !middlewares.contains_key(*m))
        {
            return Err(format!(
                "middleware {:?} does not exist or is invalid",
                missing
            ));
        }
        if let Some(unknown) = router
            .entry_points
            .iter()
            .find(|ep| !self.entry_points.contains(*ep))
        {
            return Err(format!("unknown entry point {:?}", unknown));
        }
        if let Some(options) = router.tls.as_ref().and_then(|t| t.options.as_ref()) {
            if !tls_options.contains_key(options) {
                return Err(format!(
                    "TLS options {:?} do not exist or are invalid",
                    options
                ));
            }
        }
        Ok(())
    }

    fn check_middlewares(
        &self,
        middlewares: BTreeMap<String, MiddlewareSpec>,
        errors: &mut Vec<EntryError>,
    ) -> BTreeMap<String, MiddlewareSpec> {
        let mut invalid = BTreeMap::new();
        for (name, spec) in &middlewares {
            if let Err(message) = self.registry.validate(spec) {
                invalid.insert(name.clone(), message);
            }
        }

        {
            let graph: BTreeMap<&str, Vec<String>> = middlewares
                .iter()
                .map(|(name, spec)| (name.as_str(), spec.chain_members().unwrap_or_default()))
                .collect();
            ReferenceCheck::new(&graph, &mut invalid, "middleware").run();
        }

        excise(middlewares, invalid, EntryKind::Middleware, errors)
    }
}

fn check_tls_options(
    options: BTreeMap<String, TlsOptionSpec>,
    errors: &mut Vec<EntryError>,
) -> BTreeMap<String, TlsOptionSpec> {
    let invalid = options
        .iter()
        .filter_map(|(name, spec)| match spec.min_version.as_deref() {
            Some(version) if !TLS_VERSIONS.contains(&version) => Some((
                name.clone(),
                format!("unsupported minVersion {:?}", version),
            )),
            _ => None,
        })
        .collect();
    excise(options, invalid, EntryKind::TlsOption, errors)
}

fn check_services(
    services: BTreeMap<String, ServiceSpec>,
    errors: &mut Vec<EntryError>,
) -> BTreeMap<String, ServiceSpec> {
    let mut invalid = BTreeMap::new();
    for (name, spec) in &services {
        if let Err(message) = check_service(spec) {
            invalid.insert(name.clone(), message);
        }
    }

    {
        let graph: BTreeMap<&str, Vec<String>> = services
            .iter()
            .map(|(name, spec)| {
                (
                    name.as_str(),
                    spec.references().into_iter().map(str::to_string).collect(),
                )
            })
            .collect();
        ReferenceCheck::new(&graph, &mut invalid, "service").run();
    }

    excise(services, invalid, EntryKind::Service, errors)
}

fn check_service(spec: &ServiceSpec) -> Result<(), String> {
    match spec {
        ServiceSpec::LoadBalancer(lb) => {
            if lb.servers.is_empty() {
                return Err("at least one server is required".to_string());
            }
            for server in &lb.servers {
                check_server_url(&server.url)?;
            }
            if lb.strategy == Strategy::WeightedRoundRobin && lb.servers.iter().all(|s| s.weight == 0) {
                return Err("at least one server weight must be positive".to_string());
            }
            if let Some(policy) = &lb.health_check {
                check_health_policy(policy)?;
            }
            Ok(())
        }
        ServiceSpec::Weighted(weighted) => {
            if weighted.services.is_empty() {
                return Err("at least one weighted service is required".to_string());
            }
            if weighted.services.iter().all(|s| s.weight == 0) {
                return Err("at least one weight must be positive".to_string());
            }
            Ok(())
        }
        ServiceSpec::Mirroring(mirroring) => {
            if let Some(mirror) = mirroring.mirrors.iter().find(|m| m.percent > 100) {
                return Err(format!(
                    "mirror {:?} percent {} exceeds 100",
                    mirror.name, mirror.percent
                ));
            }
            Ok(())
        }
    }
}

fn check_server_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid server url {:?}: {}", raw, e))?;
    // The forwarder speaks plain HTTP only.
    if url.scheme() != "http" {
        return Err(format!("server url {:?} must use http", raw));
    }
    if url.host_str().is_none() {
        return Err(format!("server url {:?} has no host", raw));
    }
    Ok(())
}

fn check_health_policy(policy: &HealthCheckSpec) -> Result<(), String> {
    if !policy.path.starts_with('/') {
        return Err(format!("health check path {:?} must start with '/'", policy.path));
    }
    if policy.interval_secs == 0 || policy.timeout_secs == 0 {
        return Err("health check interval and timeout must be positive".to_string());
    }
    if policy.healthy_threshold == 0 || policy.unhealthy_threshold == 0 {
        return Err("health check thresholds must be positive".to_string());
    }
    if policy.passive_failure_threshold == Some(0) {
        return Err("passiveFailureThreshold must be positive".to_string());
    }
    Ok(())
}

/// Move invalid entries out of `entries` and into `errors`.
fn excise<T>(
    entries: BTreeMap<String, T>,
    invalid: BTreeMap<String, String>,
    kind: EntryKind,
    errors: &mut Vec<EntryError>,
) -> BTreeMap<String, T> {
    errors.extend(
        invalid
            .iter()
            .map(|(name, message)| EntryError::new(kind, name.clone(), message.clone())),
    );
    entries
        .into_iter()
        .filter(|(name, _)| !invalid.contains_key(name))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done(bool),
}

/// Depth-first walk over a reference graph that marks dangling references,
/// cycle members and dependents of invalid entries as invalid.
struct ReferenceCheck<'g, 'e> {
    graph: &'g BTreeMap<&'g str, Vec<String>>,
    invalid: &'e mut BTreeMap<String, String>,
    noun: &'static str,
    marks: HashMap<&'g str, Mark>,
    stack: Vec<&'g str>,
}

impl<'g, 'e> ReferenceCheck<'g, 'e> {
    fn new(
        graph: &'g BTreeMap<&'g str, Vec<String>>,
        invalid: &'e mut BTreeMap<String, String>,
        noun: &'static str,
    ) -> Self {
        Self {
            graph,
            invalid,
            noun,
            marks: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn run(mut self) {
        for name in self.graph.keys().copied() {
            self.visit(name);
        }
    }

    fn visit(&mut self, name: &'g str) -> bool {
        if let Some(Mark::Done(valid)) = self.marks.get(name) {
            return *valid;
        }
        let Some((&key, references)) = self.graph.get_key_value(name) else {
            return false;
        };

        self.marks.insert(key, Mark::Visiting);
        self.stack.push(key);

        for reference in references {
            let Some((&child, _)) = self.graph.get_key_value(reference.as_str()) else {
                self.flag(key, format!("{} {:?} does not exist", self.noun, reference));
                continue;
            };
            match self.marks.get(child) {
                Some(Mark::Visiting) => {
                    let start = self.stack.iter().position(|n| *n == child).unwrap_or(0);
                    let mut path: Vec<&str> = self.stack[start..].to_vec();
                    path.push(child);
                    let message = format!("{} reference cycle: {}", self.noun, path.join(" -> "));
                    for member in self.stack[start..].to_vec() {
                        self.flag(member, message.clone());
                    }
                }
                _ => {
                    if !self.visit(child) {
                        self.flag(key, format!("references invalid {} {:?}", self.noun, child));
                    }
                }
            }
        }

        self.stack.pop();
        let valid = !self.invalid.contains_key(key);
        self.marks.insert(key, Mark::Done(valid));
        valid
    }

    /// Record the first reason an entry is invalid.
    fn flag(&mut self, name: &str, message: String) {
        self.invalid.entry(name.to_string()).or_insert(message);
    }
}
