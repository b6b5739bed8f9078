use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::dynamic::{Configuration, EntryError, MiddlewareSpec, RouterSpec, ServiceSpec};
use crate::health::HealthState;
use crate::load_balancer::ServiceHandle;
use crate::pipeline::LiveGraph;

#[derive(Serialize)]
pub struct Version {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub generation: u64,
    /// Hex content hash of the live configuration, absent before the first build.
    pub content_hash: Option<String>,
    pub entry_points: Vec<String>,
    pub routers: usize,
    pub services: usize,
    pub unavailable_services: Vec<String>,
    pub middlewares: usize,
    pub errors: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterView {
    pub name: String,
    #[serde(flatten)]
    pub spec: RouterSpec,
    /// Number of middlewares after chain expansion.
    pub chain_length: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerView {
    pub url: String,
    pub weight: u32,
    pub status: HealthState,
    pub active_requests: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ServiceSpec>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub params: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawData {
    pub generation: u64,
    pub configuration: Configuration,
    pub errors: Vec<EntryError>,
}

pub async fn get_version() -> Json<Version> {
    Json(Version {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_overview(State(state): State<AdminState>) -> Json<Overview> {
    let graph = state.switch.load();
    let unavailable_services = graph
        .services()
        .iter()
        .filter(|(_, service)| !service.is_available())
        .map(|(name, _)| name.clone())
        .collect();

    Json(Overview {
        generation: graph.generation(),
        content_hash: graph.content_hash().map(|h| format!("{:016x}", h)),
        entry_points: graph.entry_point_names().into_iter().map(String::from).collect(),
        routers: graph.routers().len(),
        services: graph.services().len(),
        unavailable_services,
        middlewares: graph.configuration().middlewares.len(),
        errors: graph.errors().len(),
    })
}

pub async fn get_routers(State(state): State<AdminState>) -> Json<Vec<RouterView>> {
    let graph = state.switch.load();
    Json(graph.routers().keys().filter_map(|name| router_view(&graph, name)).collect())
}

pub async fn get_router(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<RouterView>, StatusCode> {
    router_view(&state.switch.load(), &name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceView>> {
    let graph = state.switch.load();
    Json(graph.services().keys().filter_map(|name| service_view(&graph, name)).collect())
}

pub async fn get_service(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceView>, StatusCode> {
    service_view(&state.switch.load(), &name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_middlewares(State(state): State<AdminState>) -> Json<Vec<MiddlewareView>> {
    let graph = state.switch.load();
    Json(
        graph
            .configuration()
            .middlewares
            .iter()
            .map(|(name, spec)| middleware_view(name, spec))
            .collect(),
    )
}

pub async fn get_errors(State(state): State<AdminState>) -> Json<Vec<EntryError>> {
    Json(state.switch.load().errors().to_vec())
}

pub async fn get_rawdata(State(state): State<AdminState>) -> Json<RawData> {
    let graph = state.switch.load();
    Json(RawData {
        generation: graph.generation(),
        configuration: graph.configuration().clone(),
        errors: graph.errors().to_vec(),
    })
}

fn router_view(graph: &LiveGraph, name: &str) -> Option<RouterView> {
    let router = graph.routers().get(name)?;
    Some(RouterView {
        name: router.name.clone(),
        spec: router.spec.clone(),
        chain_length: router.chain.middlewares().len(),
    })
}

fn service_view(graph: &LiveGraph, name: &str) -> Option<ServiceView> {
    let service = graph.service(name)?;
    let servers = match service.as_ref() {
        ServiceHandle::LoadBalanced(pool) => pool
            .servers()
            .iter()
            .map(|server| ServerView {
                url: server.url.to_string(),
                weight: server.weight,
                status: server.state(),
                active_requests: server.active_requests(),
            })
            .collect(),
        ServiceHandle::Weighted(_) | ServiceHandle::Mirroring(_) => Vec::new(),
    };
    Some(ServiceView {
        name: name.to_string(),
        kind: service.kind(),
        available: service.is_available(),
        servers,
        config: graph.configuration().services.get(name).cloned(),
    })
}

fn middleware_view(name: &str, spec: &MiddlewareSpec) -> MiddlewareView {
    MiddlewareView {
        name: name.to_string(),
        kind: spec.kind.clone(),
        params: spec.params.clone(),
    }
}
