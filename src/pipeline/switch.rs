//! Atomic publication of live graphs.
//!
//! Request handlers `load()` the current graph once and keep the `Arc` for
//! the rest of the request, so a publish never affects in-flight requests.

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::watch;

use crate::pipeline::graph::LiveGraph;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("generation {attempted} is not newer than live generation {live}")]
    Stale { attempted: u64, live: u64 },
}

/// Holder of the live graph.
pub struct Switch {
    current: ArcSwap<LiveGraph>,
    published: watch::Sender<u64>,
}

impl Switch {
    pub fn new(initial: LiveGraph) -> Self {
        let (published, _) = watch::channel(initial.generation());
        Self {
            current: ArcSwap::from_pointee(initial),
            published,
        }
    }

    /// The graph new requests should use.
    pub fn load(&self) -> Arc<LiveGraph> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Replace the live graph with `next`, returning the graph it replaced.
    ///
    /// Only a strictly newer generation is accepted.
    pub fn publish(&self, next: Arc<LiveGraph>) -> Result<Arc<LiveGraph>, SwitchError> {
        loop {
            let current = self.current.load_full();
            if next.generation() <= current.generation() {
                return Err(SwitchError::Stale {
                    attempted: next.generation(),
                    live: current.generation(),
                });
            }
            let previous = self.current.compare_and_swap(&current, next.clone());
            if Arc::ptr_eq(&previous, &current) {
                self.published.send_replace(next.generation());
                return Ok(current);
            }
        }
    }

    /// Receiver notified with each published generation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }
}
