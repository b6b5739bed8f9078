//! Shutdown coordination.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Every long-running task (providers, aggregator, pipeline, health
/// monitor, servers) subscribes to the same broadcast channel.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.tx
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for `tasks` to finish, aborting whatever is left after `grace`.
/// Returns true when every task finished in time.
pub async fn drain(tasks: Vec<JoinHandle<()>>, grace: Duration) -> bool {
    let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
    match tokio::time::timeout(grace, join_all(tasks)).await {
        Ok(_) => true,
        Err(_) => {
            tracing::warn!(grace = ?grace, "Tasks did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_are_notified() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 1);
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stragglers() {
        let quick = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());
        assert!(!drain(vec![quick, stuck], Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_waits_for_finished_tasks() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        shutdown.trigger();
        assert!(drain(vec![task], Duration::from_secs(5)).await);
    }
}
