//! Configuration pipeline: from provider fragments to the live graph.
//!
//! # Data Flow
//! ```text
//! FragmentReceiver
//!     → aggregator.rs (latest fragment per provider, debounce, merge)
//!     → CandidateConfiguration
//!     → validator.rs (excise invalid entries, content hash)
//!     → builder.rs (compile routers, chains, services; blocking pool)
//!     → switch.rs (publish, strictly increasing generation)
//! ```
//!
//! # Design Decisions
//! - Each candidate gets a generation number when its build starts; a build
//!   that finishes after a later one has started is discarded
//! - Builds run under a time budget; on timeout or failure the live graph
//!   is kept and the next candidate retries
//! - Candidates whose content hash matches the last build are skipped

pub mod aggregator;
pub mod builder;
pub mod graph;
pub mod switch;
pub mod validator;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::observability::metrics;
use crate::provider::FragmentReceiver;

pub use aggregator::{Aggregator, CandidateConfiguration, CandidateReceiver, CandidateSender};
pub use builder::{BuildError, BuildOutcome, Builder};
pub use graph::{CompiledRouter, LiveGraph, TlsSelection};
pub use switch::{Switch, SwitchError};
pub use validator::{ValidatedConfiguration, Validator};

type BuildResult = (u64, u64, Result<BuildOutcome, BuildError>);

/// Drives validation, builds and publication for a stream of candidates.
pub struct Pipeline {
    validator: Arc<Validator>,
    builder: Arc<Builder>,
    switch: Arc<Switch>,
    build_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        validator: Validator,
        builder: Builder,
        switch: Arc<Switch>,
        build_timeout: Duration,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            builder: Arc::new(builder),
            switch,
            build_timeout,
        }
    }

    /// Run the aggregator and the pipeline on their own tasks.
    pub fn spawn(
        self,
        aggregator: Aggregator,
        fragments: FragmentReceiver,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        vec![
            tokio::spawn(aggregator.listen(fragments, tx, shutdown.subscribe())),
            tokio::spawn(self.run(rx, shutdown.subscribe())),
        ]
    }

    /// Consume candidates until the channel closes or shutdown is signalled.
    /// Builds still running when the channel closes are awaited.
    pub async fn run(self, mut candidates: CandidateReceiver, mut shutdown: broadcast::Receiver<()>) {
        let mut state = RunState {
            next_generation: self.switch.generation() + 1,
            latest_started: 0,
            last_hash: self.switch.load().content_hash(),
        };
        let mut builds: JoinSet<BuildResult> = JoinSet::new();

        tracing::info!(
            generation = self.switch.generation(),
            budget_ms = self.build_timeout.as_millis() as u64,
            "Pipeline starting"
        );

        loop {
            tokio::select! {
                candidate = candidates.recv() => match candidate {
                    Some(candidate) => self.start_build(candidate, &mut state, &mut builds),
                    None => break,
                },
                Some(joined) = builds.join_next(), if !builds.is_empty() => {
                    self.finish_build(joined, &mut state);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pipeline shutting down");
                    builds.abort_all();
                    return;
                }
            }
        }

        while let Some(joined) = builds.join_next().await {
            self.finish_build(joined, &mut state);
        }
        tracing::info!(generation = self.switch.generation(), "Pipeline stopped");
    }

    fn start_build(
        &self,
        candidate: CandidateConfiguration,
        state: &mut RunState,
        builds: &mut JoinSet<BuildResult>,
    ) {
        let validated = self.validator.validate(candidate);
        if state.last_hash == Some(validated.content_hash) {
            tracing::debug!(hash = validated.content_hash, "Configuration unchanged, build skipped");
            metrics::record_rebuild("skipped");
            return;
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.latest_started = generation;
        state.last_hash = Some(validated.content_hash);

        tracing::info!(
            generation,
            routers = validated.configuration.routers.len(),
            services = validated.configuration.services.len(),
            errors = validated.errors.len(),
            "Build started"
        );

        let hash = validated.content_hash;
        let builder = self.builder.clone();
        let previous = self.switch.load();
        let budget = self.build_timeout;
        builds.spawn(async move {
            let task = tokio::task::spawn_blocking(move || builder.build(validated, &previous, generation));
            let result = match tokio::time::timeout(budget, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(BuildError::Task(e.to_string())),
                Err(_) => Err(BuildError::Timeout(budget)),
            };
            (generation, hash, result)
        });
    }

    /// Settle one finished build and record its outcome.
    fn finish_build(&self, joined: Result<BuildResult, tokio::task::JoinError>, state: &mut RunState) -> &'static str {
        let outcome = self.settle(joined, state);
        metrics::record_rebuild(outcome);
        outcome
    }

    fn settle(&self, joined: Result<BuildResult, tokio::task::JoinError>, state: &mut RunState) -> &'static str {
        let (generation, hash, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Build task panicked");
                state.last_hash = self.switch.load().content_hash();
                return "failed";
            }
        };

        if generation < state.latest_started {
            tracing::info!(generation, latest = state.latest_started, "Build superseded, discarding");
            return "superseded";
        }

        match result {
            Ok(BuildOutcome::Built(graph)) => {
                let errors = graph.errors().len();
                match self.switch.publish(Arc::new(graph)) {
                    Ok(previous) => {
                        tracing::info!(
                            generation,
                            previous = previous.generation(),
                            hash,
                            errors,
                            "Live graph published"
                        );
                        metrics::record_generation(generation);
                        metrics::record_config_errors(errors);
                        "published"
                    }
                    Err(e) => {
                        tracing::warn!(generation, error = %e, "Publish rejected");
                        "stale"
                    }
                }
            }
            Ok(BuildOutcome::Unchanged) => {
                tracing::debug!(generation, "Live graph already current");
                "unchanged"
            }
            Err(e) => {
                tracing::error!(generation, error = %e, "Build failed, keeping live graph");
                // Let the next settle retry the same content.
                state.last_hash = self.switch.load().content_hash();
                match e {
                    BuildError::Timeout(_) => "timeout",
                    _ => "failed",
                }
            }
        }
    }
}

struct RunState {
    next_generation: u64,
    latest_started: u64,
    /// Hash of the most recently started build's configuration.
    last_hash: Option<u64>,
}
