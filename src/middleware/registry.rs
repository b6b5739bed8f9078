//! Middleware type registry.
//!
//! Maps a type tag (`stripPrefix`, `rateLimit`, ...) to a factory that
//! checks parameters against a typed schema and builds instances. The
//! registry is populated at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::dynamic::{MiddlewareSpec, CHAIN_MIDDLEWARE};
use crate::middleware::builtin::{AddPrefix, Headers, RedirectScheme, StripPrefix};
use crate::middleware::rate_limit::RateLimit;
use crate::middleware::retry::Retry;
use crate::middleware::Middleware;

/// Typed parameters of a middleware kind.
pub trait MiddlewareConfig: DeserializeOwned {
    /// Semantic checks serde cannot express.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Builds middleware instances of one kind.
pub trait MiddlewareFactory: Send + Sync {
    /// Check parameters without building anything.
    fn validate(&self, params: &Value) -> Result<(), String>;

    /// Build an instance named `name`.
    fn create(&self, name: &str, params: &Value) -> Result<Arc<dyn Middleware>, String>;
}

struct TypedFactory<C, F> {
    build: F,
    _config: PhantomData<fn() -> C>,
}

impl<C, F> MiddlewareFactory for TypedFactory<C, F>
where
    C: MiddlewareConfig,
    F: Fn(&str, C) -> Arc<dyn Middleware> + Send + Sync,
{
    fn validate(&self, params: &Value) -> Result<(), String> {
        parse::<C>(params).map(|_| ())
    }

    fn create(&self, name: &str, params: &Value) -> Result<Arc<dyn Middleware>, String> {
        let config = parse::<C>(params)?;
        Ok((self.build)(name, config))
    }
}

/// Schema of the structural `chain` type. Chains are flattened by the
/// builder and never instantiated.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainConfig {
    middlewares: Vec<String>,
}

impl MiddlewareConfig for ChainConfig {
    fn check(&self) -> Result<(), String> {
        if self.middlewares.is_empty() {
            return Err("chain must list at least one middleware".to_string());
        }
        Ok(())
    }
}

struct ChainFactory;

impl MiddlewareFactory for ChainFactory {
    fn validate(&self, params: &Value) -> Result<(), String> {
        parse::<ChainConfig>(params).map(|_| ())
    }

    fn create(&self, name: &str, _params: &Value) -> Result<Arc<dyn Middleware>, String> {
        Err(format!("chain {:?} cannot be instantiated directly", name))
    }
}

fn parse<C: MiddlewareConfig>(params: &Value) -> Result<C, String> {
    let config: C = serde_json::from_value(params.clone()).map_err(|e| e.to_string())?;
    config.check()?;
    Ok(config)
}

/// Registry of middleware kinds.
pub struct MiddlewareRegistry {
    factories: HashMap<String, Box<dyn MiddlewareFactory>>,
}

impl MiddlewareRegistry {
    /// Registry that only knows the structural `chain` type.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register_factory(CHAIN_MIDDLEWARE, Box::new(ChainFactory));
        registry
    }

    /// Registry with every built-in kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("addPrefix", |name, config| {
            Arc::new(AddPrefix::new(name, config)) as Arc<dyn Middleware>
        });
        registry.register("stripPrefix", |name, config| {
            Arc::new(StripPrefix::new(name, config)) as Arc<dyn Middleware>
        });
        registry.register("headers", |name, config| {
            Arc::new(Headers::new(name, config)) as Arc<dyn Middleware>
        });
        registry.register("redirectScheme", |name, config| {
            Arc::new(RedirectScheme::new(name, config)) as Arc<dyn Middleware>
        });
        registry.register("rateLimit", |name, config| {
            Arc::new(RateLimit::new(name, config)) as Arc<dyn Middleware>
        });
        registry.register("retry", |name, config| {
            Arc::new(Retry::new(name, config)) as Arc<dyn Middleware>
        });
        registry
    }

    /// Register a kind with typed parameters.
    pub fn register<C, F>(&mut self, kind: &str, build: F)
    where
        C: MiddlewareConfig + 'static,
        F: Fn(&str, C) -> Arc<dyn Middleware> + Send + Sync + 'static,
    {
        self.register_factory(
            kind,
            Box::new(TypedFactory {
                build,
                _config: PhantomData,
            }),
        );
    }

    /// Register a kind with a hand-written factory. Replaces any previous one.
    pub fn register_factory(&mut self, kind: &str, factory: Box<dyn MiddlewareFactory>) {
        if self.factories.insert(kind.to_string(), factory).is_some() {
            tracing::warn!(kind, "Middleware kind registered twice, replacing");
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Check a definition: known kind and valid parameters.
    pub fn validate(&self, spec: &MiddlewareSpec) -> Result<(), String> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| format!("unknown middleware type {:?}", spec.kind))?;
        factory
            .validate(&spec.params)
            .map_err(|e| format!("invalid {} parameters: {}", spec.kind, e))
    }

    /// Build an instance of a non-structural middleware.
    pub fn create(&self, name: &str, spec: &MiddlewareSpec) -> Result<Arc<dyn Middleware>, String> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| format!("unknown middleware type {:?}", spec.kind))?;
        factory.create(name, &spec.params)
    }
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
