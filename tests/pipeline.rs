//! Aggregation, validation, build and publication end to end, in process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use edge_router::config::{ConflictPolicy, EntryKind};
use edge_router::pipeline::{Aggregator, CandidateConfiguration};
use edge_router::provider::{ConfigurationFragment, ProviderMessage};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

mod common;

use common::{dynamic, get, service, RecordingUpstream, TestPipeline, ENTRY_POINT};

const DEBOUNCE: Duration = Duration::from_millis(20);

#[tokio::test]
async fn invalid_router_from_one_provider_leaves_the_other_intact() {
    let pipeline = TestPipeline::start(Arc::new(RecordingUpstream::default()), DEBOUNCE);

    pipeline
        .provider("providerA")
        .publish(dynamic(json!({
            "routers": { "r1": { "rule": "Host(`a.example.com`)", "service": "svcA" } },
            "services": { "svcA": service(&["http://10.0.0.1:8080"]) }
        })))
        .unwrap();
    pipeline
        .provider("providerB")
        .publish(dynamic(json!({
            "routers": { "r2": { "rule": "Host(`b.example.com`)", "service": "svcB" } }
        })))
        .unwrap();

    let graph = pipeline.wait_for_generation(1).await;
    let routers: Vec<&String> = graph.routers().keys().collect();
    assert_eq!(routers, vec!["r1@providerA"]);

    let errors = graph.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, EntryKind::Router);
    assert_eq!(errors[0].name, "r2@providerB");

    let ok = graph.dispatch(ENTRY_POINT, get("a.example.com", "/")).await;
    assert_eq!(ok.status(), StatusCode::OK);
    let missing = graph.dispatch(ENTRY_POINT, get("b.example.com", "/")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn one_bad_router_of_ten_yields_nine() {
    let pipeline = TestPipeline::start(Arc::new(RecordingUpstream::default()), DEBOUNCE);

    let mut routers = serde_json::Map::new();
    for i in 0..9 {
        routers.insert(
            format!("r{}", i),
            json!({ "rule": format!("Path(`/r{}`)", i), "service": "svc" }),
        );
    }
    routers.insert("bad".to_string(), json!({ "rule": "Path(`/bad`", "service": "svc" }));

    pipeline
        .provider("p")
        .publish(dynamic(json!({
            "routers": routers,
            "services": { "svc": service(&["http://10.0.0.1:8080"]) }
        })))
        .unwrap();

    let graph = pipeline.wait_for_generation(1).await;
    assert_eq!(graph.routers().len(), 9);
    assert_eq!(graph.errors().len(), 1);
    assert_eq!(graph.errors()[0].name, "bad@p");
}

#[tokio::test]
async fn higher_priority_wins_regardless_of_provider_order() {
    for (high, low) in [("alpha", "beta"), ("beta", "alpha")] {
        let pipeline = TestPipeline::start(Arc::new(RecordingUpstream::default()), DEBOUNCE);
        pipeline
            .provider(high)
            .publish(dynamic(json!({
                "routers": { "r": { "rule": "PathPrefix(`/`)", "service": "s", "priority": 10 } },
                "services": { "s": service(&["http://10.0.0.10:8080"]) }
            })))
            .unwrap();
        pipeline
            .provider(low)
            .publish(dynamic(json!({
                "routers": { "r": { "rule": "PathPrefix(`/api`)", "service": "s", "priority": 5 } },
                "services": { "s": service(&["http://10.0.0.5:8080"]) }
            })))
            .unwrap();

        let graph = pipeline.wait_for_generation(1).await;
        let route = graph.match_route(ENTRY_POINT, &get("x", "/api/users")).unwrap();
        assert_eq!(route.name, format!("r@{}", high));

        let response = graph.dispatch(ENTRY_POINT, get("x", "/api/users")).await;
        assert_eq!(response.headers()["x-server"], "http://10.0.0.10:8080/");
    }
}

#[test]
fn merge_is_independent_of_arrival_order() {
    let fragments: Vec<ProviderMessage> = ["docker", "file", "kubernetes"]
        .iter()
        .map(|provider| {
            ProviderMessage::Fragment(
                ConfigurationFragment::new(
                    *provider,
                    dynamic(json!({
                        "routers": {
                            "shared": { "rule": "Path(`/shared`)", "service": "s@file" },
                            format!("own-{}", provider): { "rule": format!("Path(`/{}`)", provider), "service": "s@file" }
                        },
                        "services": { "s": service(&["http://10.0.0.1:8080"]) }
                    })),
                )
                .unwrap(),
            )
        })
        .collect();

    let merged = |order: &[usize]| -> CandidateConfiguration {
        let mut aggregator = Aggregator::new(DEBOUNCE, ConflictPolicy::Reject);
        for &i in order {
            aggregator.apply(fragments[i].clone());
        }
        aggregator.merge()
    };

    let reference = merged(&[0, 1, 2]);
    for order in [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        assert_eq!(merged(&order), reference);
    }
    assert_eq!(reference.configuration.routers.len(), 6);
    assert_eq!(reference.configuration.services.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn bursts_coalesce_and_spaced_fragments_do_not() {
    let (fragment_tx, fragment_rx) = edge_router::provider::fragment_channel();
    let (candidate_tx, mut candidate_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let debounce = Duration::from_millis(100);
    tokio::spawn(Aggregator::new(debounce, ConflictPolicy::Reject).listen(
        fragment_rx,
        candidate_tx,
        shutdown_rx,
    ));

    let fragment = |i: usize| {
        ProviderMessage::Fragment(
            ConfigurationFragment::new(
                "k8s",
                dynamic(json!({
                    "routers": { "r": { "rule": format!("Path(`/{}`)", i), "service": "s" } }
                })),
            )
            .unwrap(),
        )
    };

    // 50 arrivals inside one window: one candidate.
    for i in 0..50 {
        fragment_tx.send(fragment(i)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(debounce * 3).await;
    let mut emitted = 0;
    while candidate_rx.try_recv().is_ok() {
        emitted += 1;
    }
    assert_eq!(emitted, 1);

    // 3 arrivals spaced beyond the window: three candidates.
    for i in 0..3 {
        fragment_tx.send(fragment(100 + i)).unwrap();
        tokio::time::sleep(debounce * 3).await;
    }
    let mut emitted = 0;
    while candidate_rx.try_recv().is_ok() {
        emitted += 1;
    }
    assert_eq!(emitted, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stable_routes_never_404_during_rebuilds() {
    let pipeline = TestPipeline::start(Arc::new(RecordingUpstream::default()), Duration::from_millis(5));
    let provider = pipeline.provider("p");

    let config = |round: usize| {
        let mut routers = serde_json::Map::new();
        routers.insert(
            "stable".to_string(),
            json!({ "rule": "PathPrefix(`/stable`)", "service": "svc" }),
        );
        for i in 0..round % 7 {
            routers.insert(
                format!("churn{}", i),
                json!({ "rule": format!("Path(`/churn/{}/{}`)", round, i), "service": "svc" }),
            );
        }
        dynamic(json!({
            "routers": routers,
            "services": { "svc": service(&["http://10.0.0.1:8080"]) }
        }))
    };

    provider.publish(config(0)).unwrap();
    pipeline.wait_for_generation(1).await;

    let stop = Arc::new(AtomicBool::new(false));
    let misses = Arc::new(AtomicUsize::new(0));
    let served = Arc::new(AtomicUsize::new(0));
    let clients: Vec<_> = (0..4)
        .map(|_| {
            let switch = pipeline.switch.clone();
            let (stop, misses, served) = (stop.clone(), misses.clone(), served.clone());
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    let graph = switch.load();
                    let response = graph.dispatch(ENTRY_POINT, get("x", "/stable/ping")).await;
                    if response.status() == StatusCode::NOT_FOUND {
                        misses.fetch_add(1, Ordering::Relaxed);
                    }
                    served.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for round in 1..=30 {
        provider.publish(config(round)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let before = pipeline.switch.generation();
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.store(true, Ordering::Relaxed);
    for client in clients {
        client.await.unwrap();
    }

    assert!(before > 1, "rebuilds happened");
    assert!(served.load(Ordering::Relaxed) > 0);
    assert_eq!(misses.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn withdrawn_provider_routes_disappear() {
    let pipeline = TestPipeline::start(Arc::new(RecordingUpstream::default()), DEBOUNCE);
    let provider = pipeline.provider("docker");
    provider
        .publish(dynamic(json!({
            "routers": { "web": { "rule": "Path(`/`)", "service": "s" } },
            "services": { "s": service(&["http://10.0.0.1:8080"]) }
        })))
        .unwrap();
    let graph = pipeline.wait_for_generation(1).await;
    assert_eq!(graph.routers().len(), 1);

    provider.withdraw().unwrap();
    let graph = pipeline.wait_for_generation(2).await;
    assert!(graph.routers().is_empty());
    let response = graph.dispatch(ENTRY_POINT, get("x", "/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conflicting_names_follow_the_configured_policy() {
    let both = |pipeline: &TestPipeline| {
        for provider in ["a", "b"] {
            pipeline
                .provider(provider)
                .publish(dynamic(json!({
                    "routers": { "r@shared": { "rule": format!("Path(`/{}`)", provider), "service": "s@a" } },
                    "services": { "s": service(&["http://10.0.0.1:8080"]) }
                })))
                .unwrap();
        }
    };

    let rejecting = TestPipeline::start(Arc::new(RecordingUpstream::default()), DEBOUNCE);
    both(&rejecting);
    let graph = rejecting.wait_for_generation(1).await;
    assert!(graph.routers().is_empty());
    assert_eq!(graph.errors().len(), 1);
    assert_eq!(graph.errors()[0].name, "r@shared");
    assert!(graph.errors()[0].message.contains("a, b"));

    let first = TestPipeline::start_with(
        Arc::new(RecordingUpstream::default()),
        DEBOUNCE,
        ConflictPolicy::FirstProvider,
    );
    both(&first);
    let graph = first.wait_for_generation(1).await;
    assert_eq!(graph.routers()["r@shared"].spec.rule, "Path(`/a`)");
    assert_eq!(graph.errors().len(), 1);
}
