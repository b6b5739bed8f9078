//! Compiles a validated configuration into a live graph.
//!
//! # Responsibilities
//! - Build or reuse one handle per service (leaf pools before composites)
//! - Compile each named middleware once and share it between routers
//! - Flatten `chain` middlewares into router chains
//! - Build one ordered route table per entry point
//!
//! Content errors never reach the builder; anything it cannot resolve is an
//! internal invariant violation and fails the whole build.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::dynamic::{Configuration, ServiceSpec};
use crate::load_balancer::{Mirroring, ServerPool, ServiceHandle, Upstream, WeightedServices};
use crate::middleware::{Chain, Middleware, MiddlewareRegistry};
use crate::pipeline::graph::{CompiledRouter, GraphParts, LiveGraph};
use crate::pipeline::validator::ValidatedConfiguration;
use crate::routing::{RouteEntry, RouteTable, Rule};

/// Error type for builds.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("build exceeded its budget of {0:?}")]
    Timeout(Duration),

    #[error("build task failed: {0}")]
    Task(String),
}

/// Result of a build request.
#[derive(Debug)]
pub enum BuildOutcome {
    /// The configuration matches the graph being served.
    Unchanged,
    Built(LiveGraph),
}

pub struct Builder {
    registry: Arc<MiddlewareRegistry>,
    upstream: Arc<dyn Upstream>,
    entry_points: Vec<String>,
}

impl Builder {
    pub fn new(
        registry: Arc<MiddlewareRegistry>,
        upstream: Arc<dyn Upstream>,
        entry_points: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry,
            upstream,
            entry_points: entry_points.into_iter().collect(),
        }
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// Compile `validated` as generation `generation`. Leaf pools whose
    /// definition is unchanged are taken over from `previous`.
    pub fn build(
        &self,
        validated: ValidatedConfiguration,
        previous: &LiveGraph,
        generation: u64,
    ) -> Result<BuildOutcome, BuildError> {
        if previous.content_hash() == Some(validated.content_hash) {
            return Ok(BuildOutcome::Unchanged);
        }

        let ValidatedConfiguration {
            configuration,
            errors,
            content_hash,
        } = validated;

        let services = ServiceCompiler {
            specs: &configuration.services,
            previous,
            upstream: &self.upstream,
            built: BTreeMap::new(),
            reused: 0,
        }
        .compile_all()?;

        let middlewares = self.compile_middlewares(&configuration)?;

        let mut routers = BTreeMap::new();
        let mut tables: HashMap<String, Vec<RouteEntry<Arc<CompiledRouter>>>> = self
            .entry_points
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        for (name, spec) in &configuration.routers {
            let rule = Rule::parse(&spec.rule)
                .map_err(|e| BuildError::Invariant(format!("router {} has an invalid rule: {}", name, e)))?;
            let service = services.get(&spec.service).ok_or_else(|| {
                BuildError::Invariant(format!("router {} references unknown service {}", name, spec.service))
            })?;

            let mut chain = Vec::new();
            for middleware in &spec.middlewares {
                self.flatten(middleware, &configuration, &middlewares, &mut chain, 0)?;
            }

            let router = Arc::new(CompiledRouter {
                name: name.clone(),
                spec: spec.clone(),
                chain: Chain::new(chain, service.clone()),
            });

            let bound: Vec<&String> = if spec.entry_points.is_empty() {
                self.entry_points.iter().collect()
            } else {
                spec.entry_points.iter().collect()
            };
            for entry_point in bound {
                let table = tables.get_mut(entry_point).ok_or_else(|| {
                    BuildError::Invariant(format!("router {} bound to unknown entry point {}", name, entry_point))
                })?;
                table.push(RouteEntry {
                    name: name.clone(),
                    rule: rule.clone(),
                    priority: spec.priority,
                    specificity: spec.rule.len(),
                    target: router.clone(),
                });
            }
            routers.insert(name.clone(), router);
        }

        let entry_points = tables
            .into_iter()
            .map(|(name, routes)| (name, RouteTable::new(routes)))
            .collect();

        tracing::debug!(
            generation,
            routers = routers.len(),
            services = services.len(),
            middlewares = middlewares.len(),
            "Graph built"
        );

        Ok(BuildOutcome::Built(LiveGraph::from_parts(GraphParts {
            generation,
            content_hash,
            entry_points,
            routers,
            services,
            middlewares,
            configuration,
            errors,
        })))
    }

    fn compile_middlewares(
        &self,
        configuration: &Configuration,
    ) -> Result<BTreeMap<String, Arc<dyn Middleware>>, BuildError> {
        let mut compiled = BTreeMap::new();
        for (name, spec) in &configuration.middlewares {
            if spec.chain_members().is_some() {
                continue;
            }
            let middleware = self
                .registry
                .create(name, spec)
                .map_err(|e| BuildError::Invariant(format!("middleware {}: {}", name, e)))?;
            compiled.insert(name.clone(), middleware);
        }
        Ok(compiled)
    }

    /// Append `name` (or, for a chain, its members) to `out`.
    fn flatten(
        &self,
        name: &str,
        configuration: &Configuration,
        compiled: &BTreeMap<String, Arc<dyn Middleware>>,
        out: &mut Vec<Arc<dyn Middleware>>,
        depth: usize,
    ) -> Result<(), BuildError> {
        if depth > configuration.middlewares.len() {
            return Err(BuildError::Invariant(format!("middleware chain {} is cyclic", name)));
        }
        if let Some(middleware) = compiled.get(name) {
            out.push(middleware.clone());
            return Ok(());
        }
        let members = configuration
            .middlewares
            .get(name)
            .and_then(|spec| spec.chain_members())
            .ok_or_else(|| BuildError::Invariant(format!("unknown middleware {}", name)))?;
        for member in &members {
            self.flatten(member, configuration, compiled, out, depth + 1)?;
        }
        Ok(())
    }
}

struct ServiceCompiler<'a> {
    specs: &'a BTreeMap<String, ServiceSpec>,
    previous: &'a LiveGraph,
    upstream: &'a Arc<dyn Upstream>,
    built: BTreeMap<String, Arc<ServiceHandle>>,
    reused: usize,
}

impl ServiceCompiler<'_> {
    fn compile_all(mut self) -> Result<BTreeMap<String, Arc<ServiceHandle>>, BuildError> {
        for name in self.specs.keys() {
            self.compile(name, 0)?;
        }
        if self.reused > 0 {
            tracing::debug!(reused = self.reused, "Reused server pools from previous graph");
        }
        Ok(self.built)
    }

    fn compile(&mut self, name: &str, depth: usize) -> Result<Arc<ServiceHandle>, BuildError> {
        if let Some(handle) = self.built.get(name) {
            return Ok(handle.clone());
        }
        if depth > self.specs.len() {
            return Err(BuildError::Invariant(format!("service {} is part of a cycle", name)));
        }
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| BuildError::Invariant(format!("unknown service {}", name)))?;

        let handle = match spec {
            ServiceSpec::LoadBalancer(lb) => {
                let reusable = self
                    .previous
                    .service(name)
                    .and_then(|s| s.as_pool())
                    .filter(|pool| pool.spec() == lb);
                let pool = match reusable {
                    Some(pool) => {
                        self.reused += 1;
                        pool.clone()
                    }
                    None => Arc::new(
                        ServerPool::new(name, lb.clone(), self.upstream.clone()).map_err(|e| {
                            BuildError::Invariant(format!("service {} has an invalid server url: {}", name, e))
                        })?,
                    ),
                };
                ServiceHandle::LoadBalanced(pool)
            }
            ServiceSpec::Weighted(weighted) => {
                let mut children = Vec::with_capacity(weighted.services.len());
                for child in &weighted.services {
                    children.push((self.compile(&child.name, depth + 1)?, child.weight));
                }
                ServiceHandle::Weighted(WeightedServices::new(name, children))
            }
            ServiceSpec::Mirroring(mirroring) => {
                let main = self.compile(&mirroring.service, depth + 1)?;
                let mut mirrors = Vec::with_capacity(mirroring.mirrors.len());
                for mirror in &mirroring.mirrors {
                    mirrors.push((self.compile(&mirror.name, depth + 1)?, mirror.percent));
                }
                ServiceHandle::Mirroring(Mirroring::new(
                    name,
                    main,
                    mirrors,
                    mirroring.max_body_size,
                ))
            }
        };

        let handle = Arc::new(handle);
        self.built.insert(name.to_string(), handle.clone());
        Ok(handle)
    }
}
