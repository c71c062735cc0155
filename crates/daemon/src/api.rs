// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote control server: the local command surface mirrored over HTTP.
//!
//! Bearer token auth when configured; tokens compare in constant time.

use std::sync::Arc;

use axum::extract::{Path, Query, Request as AxumRequest, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::env::DAEMON_VERSION;
use crate::orchestrator::{CommandError, DaemonOrchestrator};

/// Shared state for the device API.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<DaemonOrchestrator>,
    pub token: Option<Arc<str>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/list", get(list))
        .route("/api/status/{name}", get(status))
        .route("/api/start/{name}", post(start))
        .route("/api/stop/{name}", post(stop))
        .route("/api/restart/{name}", post(restart))
        .route("/api/reload", post(reload))
        .route("/api/logs/{name}", get(logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

/// Reject requests without the configured bearer token.
/// No token configured means an open (trusted-network) API.
async fn require_bearer(
    State(state): State<ApiState>,
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
            warn!("rejected unauthenticated api request");
            detail(StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response()
        }
    }
}

fn detail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "detail": message.into() })))
}

fn command_status(e: &CommandError) -> StatusCode {
    match e {
        CommandError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": DAEMON_VERSION }))
}

async fn list(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.orchestrator.list())
}

async fn status(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.info(&name) {
        Some(info) => Json(info).into_response(),
        None => detail(StatusCode::NOT_FOUND, format!("no such workload: {name}")).into_response(),
    }
}

async fn start(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    action_reply(
        state.orchestrator.start_workload(&name).await,
        format!("started {name}"),
    )
}

async fn stop(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    action_reply(
        state.orchestrator.stop_workload(&name).await,
        format!("stopped {name}"),
    )
}

async fn restart(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    action_reply(
        state.orchestrator.restart_workload(&name).await,
        format!("restarted {name}"),
    )
}

/// `{success, message}` for lifecycle commands. A missing workload is
/// 404; a command refused by policy reports success=false.
fn action_reply(result: Result<(), CommandError>, ok_message: String) -> Response {
    match result {
        Ok(()) => Json(serde_json::json!({ "success": true, "message": ok_message }))
            .into_response(),
        Err(CommandError::NotFound(name)) => {
            detail(StatusCode::NOT_FOUND, format!("no such workload: {name}")).into_response()
        }
        Err(e) => Json(serde_json::json!({ "success": false, "message": e.to_string() }))
            .into_response(),
    }
}

async fn reload(State(state): State<ApiState>) -> Response {
    match state.orchestrator.reload().await {
        Ok(changes) => {
            Json(serde_json::json!({ "success": true, "changes": changes })).into_response()
        }
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
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

async fn logs(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    if !(1..=10_000).contains(&query.lines) {
        return detail(StatusCode::BAD_REQUEST, "lines must be in [1, 10000]").into_response();
    }
    match state.orchestrator.logs(&name, query.lines).await {
        Ok(lines) => Json(serde_json::json!({ "name": name, "lines": lines })).into_response(),
        Err(e) => detail(command_status(&e), e.to_string()).into_response(),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
