//! Fragment aggregation: debounce and deterministic merge.
//!
//! # Responsibilities
//! - Keep the latest fragment of every provider (last write wins)
//! - Coalesce bursts of fragments into one candidate per quiet period
//! - Merge fragments in lexical provider order and report name conflicts
//!
//! # Design Decisions
//! - Single consumer task, so no locking inside the aggregator
//! - A candidate is emitted on every settle, even if nothing changed;
//!   the pipeline compares content hashes downstream

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::config::dynamic::{Configuration, EntryError, EntryKind};
use crate::config::schema::ConflictPolicy;
use crate::provider::{FragmentReceiver, ProviderMessage};

/// Merged, not yet validated configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateConfiguration {
    pub configuration: Configuration,
    /// Entries excised because more than one provider claimed the name.
    pub conflicts: Vec<EntryError>,
    /// Providers that contributed, in merge order.
    pub providers: Vec<String>,
}

pub type CandidateSender = mpsc::UnboundedSender<CandidateConfiguration>;
pub type CandidateReceiver = mpsc::UnboundedReceiver<CandidateConfiguration>;

pub struct Aggregator {
    latest: BTreeMap<String, Configuration>,
    debounce: Duration,
    policy: ConflictPolicy,
}

impl Aggregator {
    pub fn new(debounce: Duration, policy: ConflictPolicy) -> Self {
        Self {
            latest: BTreeMap::new(),
            debounce,
            policy,
        }
    }

    /// Record a provider message. A fragment replaces the provider's
    /// previous one; a withdrawal removes it.
    pub fn apply(&mut self, message: ProviderMessage) {
        match message {
            ProviderMessage::Fragment(fragment) => {
                let provider = fragment.provider().to_string();
                tracing::debug!(
                    provider = %provider,
                    routers = fragment.configuration().routers.len(),
                    services = fragment.configuration().services.len(),
                    "Fragment received"
                );
                self.latest
                    .insert(provider, fragment.configuration().clone());
            }
            ProviderMessage::Withdrawn { provider } => {
                if self.latest.remove(&provider).is_some() {
                    tracing::info!(provider = %provider, "Provider withdrawn, removing its entries");
                }
            }
        }
    }

    /// Merge every current fragment into one candidate.
    pub fn merge(&self) -> CandidateConfiguration {
        let mut conflicts = Vec::new();
        let routers = merge_entries(&self.latest, EntryKind::Router, self.policy, &mut conflicts, |c| {
            &c.routers
        });
        let services = merge_entries(&self.latest, EntryKind::Service, self.policy, &mut conflicts, |c| {
            &c.services
        });
        let middlewares = merge_entries(
            &self.latest,
            EntryKind::Middleware,
            self.policy,
            &mut conflicts,
            |c| &c.middlewares,
        );
        let tls_options = merge_entries(
            &self.latest,
            EntryKind::TlsOption,
            self.policy,
            &mut conflicts,
            |c| &c.tls_options,
        );

        CandidateConfiguration {
            configuration: Configuration {
                routers,
                services,
                middlewares,
                tls_options,
            },
            conflicts,
            providers: self.latest.keys().cloned().collect(),
        }
    }

    /// Consume provider messages until shutdown or until every sender is
    /// gone, emitting one candidate per debounce settle.
    pub async fn listen(
        mut self,
        mut rx: FragmentReceiver,
        tx: CandidateSender,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(debounce_ms = self.debounce.as_millis() as u64, "Aggregator starting");

        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        self.apply(message);
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    None => {
                        if deadline.is_some() {
                            self.emit(&tx);
                        }
                        tracing::info!("Fragment channel closed, aggregator exiting");
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if !self.emit(&tx) {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Aggregator received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn emit(&self, tx: &CandidateSender) -> bool {
        let candidate = self.merge();
        tracing::debug!(
            providers = candidate.providers.len(),
            routers = candidate.configuration.routers.len(),
            conflicts = candidate.conflicts.len(),
            "Emitting candidate configuration"
        );
        if tx.send(candidate).is_err() {
            tracing::warn!("Candidate receiver dropped, aggregator exiting");
            return false;
        }
        true
    }
}

fn merge_entries<T: Clone>(
    latest: &BTreeMap<String, Configuration>,
    kind: EntryKind,
    policy: ConflictPolicy,
    conflicts: &mut Vec<EntryError>,
    select: impl Fn(&Configuration) -> &BTreeMap<String, T>,
) -> BTreeMap<String, T> {
    // Claims per qualified name, in lexical provider order.
    let mut claims: BTreeMap<&str, Vec<(&str, &T)>> = BTreeMap::new();
    for (provider, configuration) in latest {
        for (name, entry) in select(configuration) {
            claims
                .entry(name.as_str())
                .or_default()
                .push((provider.as_str(), entry));
        }
    }

    let mut merged = BTreeMap::new();
    for (name, claimants) in claims {
        if let [(_, entry)] = claimants.as_slice() {
            merged.insert(name.to_string(), (*entry).clone());
            continue;
        }

        let providers: Vec<&str> = claimants.iter().map(|(p, _)| *p).collect();
        match policy {
            ConflictPolicy::Reject => {
                let message = format!("defined by multiple providers: {}", providers.join(", "));
                tracing::warn!(kind = %kind, name, providers = ?providers, "Conflicting definitions rejected");
                conflicts.push(EntryError::new(kind, name, message));
            }
            ConflictPolicy::FirstProvider => {
                let (winner, entry) = claimants[0];
                merged.insert(name.to_string(), entry.clone());
                for (loser, _) in &claimants[1..] {
                    let message = format!(
                        "definition from provider {} ignored, provider {} takes precedence",
                        loser, winner
                    );
                    tracing::warn!(kind = %kind, name, provider = %loser, "Conflicting definition ignored");
                    conflicts.push(EntryError::new(kind, name, message));
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConfigurationFragment;
    use serde_json::json;

    fn fragment(provider: &str, value: serde_json::Value) -> ProviderMessage {
        let raw: Configuration = serde_json::from_value(value).unwrap();
        ProviderMessage::Fragment(ConfigurationFragment::new(provider, raw).unwrap())
    }

    fn router(service: &str) -> serde_json::Value {
        json!({ "rule": "Path(`/`)", "service": service })
    }

    fn single_router(provider: &str, name: &str) -> ProviderMessage {
        let mut routers = serde_json::Map::new();
        routers.insert(name.to_string(), router("s"));
        fragment(provider, json!({ "routers": routers }))
    }

    #[test]
    fn last_write_wins_per_provider() {
        let mut aggregator = Aggregator::new(Duration::from_millis(10), ConflictPolicy::Reject);
        aggregator.apply(fragment("a", json!({ "routers": { "one": router("s") } })));
        aggregator.apply(fragment("a", json!({ "routers": { "two": router("s") } })));

        let candidate = aggregator.merge();
        let names: Vec<&String> = candidate.configuration.routers.keys().collect();
        assert_eq!(names, vec!["two@a"]);
    }

    #[test]
    fn withdrawal_removes_entries() {
        let mut aggregator = Aggregator::new(Duration::from_millis(10), ConflictPolicy::Reject);
        aggregator.apply(fragment("a", json!({ "routers": { "one": router("s") } })));
        aggregator.apply(fragment("b", json!({ "routers": { "two": router("s") } })));
        aggregator.apply(ProviderMessage::Withdrawn {
            provider: "a".to_string(),
        });

        let candidate = aggregator.merge();
        assert_eq!(candidate.providers, vec!["b"]);
        assert_eq!(candidate.configuration.routers.len(), 1);
    }

    #[test]
    fn merge_is_order_independent() {
        let messages = vec![
            fragment("b", json!({ "routers": { "r": router("x") } })),
            fragment("a", json!({ "routers": { "r": router("y") } })),
            fragment("c", json!({ "services": { "s": { "loadBalancer": { "servers": [{ "url": "http://h:1" }] } } } })),
        ];

        let mut forward = Aggregator::new(Duration::from_millis(10), ConflictPolicy::Reject);
        for m in messages.iter().cloned() {
            forward.apply(m);
        }
        let mut backward = Aggregator::new(Duration::from_millis(10), ConflictPolicy::Reject);
        for m in messages.into_iter().rev() {
            backward.apply(m);
        }
        assert_eq!(forward.merge(), backward.merge());
    }

    fn colliding() -> Aggregator {
        let mut aggregator = Aggregator::new(Duration::from_millis(10), ConflictPolicy::Reject);
        // Both providers define the same qualified name explicitly.
        aggregator.apply(fragment("b", json!({ "routers": { "shared@x": router("s2") } })));
        aggregator.apply(fragment("a", json!({ "routers": { "shared@x": router("s1") } })));
        aggregator
    }

    #[test]
    fn reject_policy_excises_every_claim() {
        let candidate = colliding().merge();
        assert!(candidate.configuration.routers.is_empty());
        assert_eq!(candidate.conflicts.len(), 1);
        assert_eq!(candidate.conflicts[0].name, "shared@x");
        assert!(candidate.conflicts[0].message.contains("a, b"));
    }

    #[test]
    fn first_provider_policy_keeps_lexically_first() {
        let mut aggregator = colliding();
        aggregator.policy = ConflictPolicy::FirstProvider;
        let candidate = aggregator.merge();
        assert_eq!(candidate.configuration.routers["shared@x"].service, "s1@a");
        assert_eq!(candidate.conflicts.len(), 1);
        assert!(candidate.conflicts[0].message.contains("provider b ignored"));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced() {
        let (tx, rx) = crate::provider::fragment_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let aggregator = Aggregator::new(Duration::from_millis(100), ConflictPolicy::Reject);
        let task = tokio::spawn(aggregator.listen(rx, out_tx, shutdown_rx));

        for i in 0..20 {
            tx.send(single_router("a", &format!("r{}", i))).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let candidate = out_rx.try_recv().unwrap();
        assert!(candidate.configuration.routers.contains_key("r19@a"));
        assert!(out_rx.try_recv().is_err());

        // Spaced beyond the window: one candidate each.
        for i in 0..3 {
            tx.send(single_router("a", &format!("s{}", i))).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let mut count = 0;
        while out_rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pending_fragments_flush_when_channel_closes() {
        let (tx, rx) = crate::provider::fragment_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let aggregator = Aggregator::new(Duration::from_secs(60), ConflictPolicy::Reject);

        tx.send(fragment("a", json!({ "routers": { "r": router("s") } })))
            .unwrap();
        drop(tx);
        aggregator.listen(rx, out_tx, shutdown_rx).await;

        assert_eq!(out_rx.recv().await.unwrap().configuration.routers.len(), 1);
    }
}
