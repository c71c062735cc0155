// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Central HTTP API: heartbeat sink, fleet queries, device proxies,
//! and deployment management.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, Request as AxumRequest, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use mc_core::{DeployRequest, HeartbeatPayload};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::client::{DeviceApi, FleetClientError, WorkloadAction};
use crate::deploy::{DeployError, Deployer};
use crate::store::FleetStore;

/// Shared state for the central API.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FleetStore>,
    pub deployer: Arc<Deployer>,
    pub devices: Arc<dyn DeviceApi>,
    pub token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/fleet/clients", get(list_clients))
        .route("/api/fleet/clients/{name}", get(get_client))
        .route("/api/fleet/clients/{name}/workloads", get(client_workloads))
        .route("/api/fleet/clients/{client}/workloads/{workload}", get(get_workload))
        .route(
            "/api/fleet/clients/{client}/workloads/{workload}/{action}",
            post(workload_action),
        )
        .route(
            "/api/fleet/clients/{client}/workloads/{workload}/logs",
            get(workload_logs),
        )
        .route("/api/fleet/clients/{client}/reload", post(reload_client))
        .route("/api/fleet/deployments", post(create_deployment).get(list_deployments))
        .route("/api/fleet/deployments/{id}", get(get_deployment))
        .route("/api/fleet/deployments/{id}/cancel", post(cancel_deployment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

async fn require_bearer(
    State(state): State<AppState>,
    request: AxumRequest,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        _ => {
            warn!("rejected unauthenticated fleet request");
            detail(StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response()
        }
    }
}

fn detail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "detail": message.into() })))
}

fn store_error(e: impl std::fmt::Display) -> Response {
    detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

// ---- heartbeats --------------------------------------------------

async fn heartbeat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<HeartbeatPayload>,
) -> Response {
    let fallback_host = addr.ip().to_string();
    match state.store.record_heartbeat(&payload, Some(&fallback_host), Utc::now()) {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(e) => store_error(e),
    }
}

// ---- fleet queries -----------------------------------------------

async fn list_clients(State(state): State<AppState>) -> Response {
    match state.store.list_clients() {
        Ok(clients) => Json(clients).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_client(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.store.get_client(&name) {
        Ok(Some(client)) => Json(client).into_response(),
        Ok(None) => detail(StatusCode::NOT_FOUND, format!("no such client: {name}")).into_response(),
        Err(e) => store_error(e),
    }
}

async fn client_workloads(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.store.get_client(&name) {
        Ok(Some(_)) => match state.store.client_workloads(&name) {
            Ok(workloads) => Json(workloads).into_response(),
            Err(e) => store_error(e),
        },
        Ok(None) => detail(StatusCode::NOT_FOUND, format!("no such client: {name}")).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_workload(
    State(state): State<AppState>,
    Path((client, workload)): Path<(String, String)>,
) -> Response {
    match state.store.get_workload(&client, &workload) {
        Ok(Some(info)) => Json(info).into_response(),
        Ok(None) => detail(
            StatusCode::NOT_FOUND,
            format!("no such workload: {client}/{workload}"),
        )
        .into_response(),
        Err(e) => store_error(e),
    }
}

// ---- device proxies ----------------------------------------------

fn proxy_error(e: FleetClientError) -> Response {
    match e {
        FleetClientError::Unreachable(message) => {
            detail(StatusCode::BAD_GATEWAY, message).into_response()
        }
        FleetClientError::Status { status, body } => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => (status, Json(json)).into_response(),
                Err(_) => detail(status, body).into_response(),
            }
        }
    }
}

fn endpoint_of(state: &AppState, client: &str) -> Result<(String, u16), Response> {
    match state.store.client_endpoint(client) {
        Ok(Some(endpoint)) => Ok(endpoint),
        Ok(None) => Err(detail(StatusCode::NOT_FOUND, format!("no such client: {client}"))
            .into_response()),
        Err(e) => Err(store_error(e)),
    }
}

async fn workload_action(
    State(state): State<AppState>,
    Path((client, workload, action)): Path<(String, String, String)>,
) -> Response {
    let action = match action.as_str() {
        "start" => WorkloadAction::Start,
        "stop" => WorkloadAction::Stop,
        "restart" => WorkloadAction::Restart,
        other => {
            return detail(StatusCode::NOT_FOUND, format!("no such action: {other}"))
                .into_response();
        }
    };
    let (host, port) = match endpoint_of(&state, &client) {
        Ok(endpoint) => endpoint,
        Err(response) => return response,
    };
    match state.devices.workload_action(&host, port, &workload, action).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => proxy_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_lines")]
    lines: usize,
}

fn default_log_lines() -> usize {
    100
}

async fn workload_logs(
    State(state): State<AppState>,
    Path((client, workload)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let (host, port) = match endpoint_of(&state, &client) {
        Ok(endpoint) => endpoint,
        Err(response) => return response,
    };
    match state.devices.logs(&host, port, &workload, query.lines).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => proxy_error(e),
    }
}

async fn reload_client(State(state): State<AppState>, Path(client): Path<String>) -> Response {
    let (host, port) = match endpoint_of(&state, &client) {
        Ok(endpoint) => endpoint,
        Err(response) => return response,
    };
    match state.devices.reload(&host, port).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => proxy_error(e),
    }
}

// ---- deployments -------------------------------------------------

async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Response {
    match state.deployer.start(request).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e @ (DeployError::NoTargets | DeployError::InvalidBatchSize)) => {
            detail(StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentsQuery {
    #[serde(default = "default_deployments_limit")]
    limit: usize,
}

fn default_deployments_limit() -> usize {
    20
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<DeploymentsQuery>,
) -> Response {
    match state.store.list_deployments(query.limit.clamp(1, 500)) {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_deployment(&id) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => {
            detail(StatusCode::NOT_FOUND, format!("no such deployment: {id}")).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn cancel_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.deployer.cancel(&id) {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(DeployError::NotFound(id)) => {
            detail(StatusCode::NOT_FOUND, format!("no such deployment: {id}")).into_response()
        }
        Err(e @ DeployError::NotCancellable(_)) => {
            detail(StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
