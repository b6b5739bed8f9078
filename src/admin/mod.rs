//! Read-only introspection API over the live graph.
//!
//! All endpoints require `Authorization: Bearer <admin.api_key>`.
//!
//! ```text
//! GET /api/version
//! GET /api/overview
//! GET /api/http/routers          GET /api/http/routers/{name}
//! GET /api/http/services         GET /api/http/services/{name}
//! GET /api/http/middlewares
//! GET /api/errors
//! GET /api/rawdata
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::pipeline::Switch;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub switch: Arc<Switch>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/version", get(get_version))
        .route("/api/overview", get(get_overview))
        .route("/api/http/routers", get(get_routers))
        .route("/api/http/routers/{name}", get(get_router))
        .route("/api/http/services", get(get_services))
        .route("/api/http/services/{name}", get(get_service))
        .route("/api/http/middlewares", get(get_middlewares))
        .route("/api/errors", get(get_errors))
        .route("/api/rawdata", get(get_rawdata))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve_admin(
    state: AdminState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::Configuration;
    use crate::load_balancer::testing::EchoUpstream;
    use crate::middleware::MiddlewareRegistry;
    use crate::pipeline::aggregator::CandidateConfiguration;
    use crate::pipeline::{BuildOutcome, Builder, LiveGraph, Validator};
    use crate::provider::ConfigurationFragment;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let registry = Arc::new(MiddlewareRegistry::with_builtin());
        let entry_points = vec!["web".to_string()];
        let raw: Configuration = serde_json::from_value(json!({
            "routers": {
                "api": { "rule": "PathPrefix(`/api`)", "service": "api", "middlewares": ["strip"] },
                "broken": { "rule": "Path(`/x`)", "service": "missing" }
            },
            "services": {
                "api": { "loadBalancer": { "servers": [
                    { "url": "http://10.0.0.1:8080" },
                    { "url": "http://10.0.0.2:8080" }
                ] } }
            },
            "middlewares": { "strip": { "stripPrefix": { "prefixes": ["/api"] } } }
        }))
        .unwrap();
        let candidate = CandidateConfiguration {
            configuration: ConfigurationFragment::new("file", raw)
                .unwrap()
                .configuration()
                .clone(),
            ..Default::default()
        };
        let validated = Validator::new(registry.clone(), entry_points.clone()).validate(candidate);
        let builder = Builder::new(registry, Arc::new(EchoUpstream), entry_points.clone());
        let graph = match builder.build(validated, &LiveGraph::empty(entry_points), 1).unwrap() {
            BuildOutcome::Built(graph) => graph,
            BuildOutcome::Unchanged => unreachable!(),
        };
        AdminState {
            switch: Arc::new(Switch::new(graph)),
            api_key: Arc::from("secret"),
        }
    }

    async fn get_json(state: AdminState, uri: &str) -> (StatusCode, Value) {
        let response = setup_admin_router(state)
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let app = setup_admin_router(state());
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/version")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn overview_counts_live_entries_and_errors() {
        let (status, body) = get_json(state(), "/api/overview").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generation"], 1);
        assert_eq!(body["routers"], 1);
        assert_eq!(body["services"], 1);
        assert_eq!(body["errors"], 1);
        assert_eq!(body["entryPoints"], json!(["web"]));
    }

    #[tokio::test]
    async fn lists_routers_and_reports_errors() {
        let (_, routers) = get_json(state(), "/api/http/routers").await;
        assert_eq!(routers.as_array().unwrap().len(), 1);
        assert_eq!(routers[0]["name"], "api@file");
        assert_eq!(routers[0]["service"], "api@file");
        assert_eq!(routers[0]["chainLength"], 1);

        let (_, errors) = get_json(state(), "/api/errors").await;
        assert_eq!(errors[0]["name"], "broken@file");
        assert_eq!(errors[0]["kind"], "router");
    }

    #[tokio::test]
    async fn services_include_server_health() {
        let state = state();
        let graph = state.switch.load();
        let pool = graph.service("api@file").unwrap().as_pool().unwrap();
        pool.servers()[1].health().record_probe(false, 1, 1);

        let (status, service) = get_json(state.clone(), "/api/http/services/api@file").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(service["type"], "loadBalancer");
        assert_eq!(service["available"], true);
        assert_eq!(service["servers"][0]["status"], "healthy");
        assert_eq!(service["servers"][1]["status"], "unhealthy");

        let (status, _) = get_json(state, "/api/http/services/nope@file").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rawdata_returns_configuration() {
        let (_, raw) = get_json(state(), "/api/rawdata").await;
        assert!(raw["configuration"]["routers"]["api@file"].is_object());
        assert_eq!(raw["configuration"]["middlewares"]["strip@file"]["stripPrefix"]["prefixes"][0], "/api");
    }
}
