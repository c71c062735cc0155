// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin HTTP adapter for one device's control API.
//!
//! No retries here: the deployer and the proxy routes decide what a
//! failure means.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Connect timeout for every device call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Request timeout for ordinary calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Log fetches stream more data.
const LOGS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum FleetClientError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Lifecycle actions proxied to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadAction {
    Start,
    Stop,
    Restart,
}

impl WorkloadAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadAction::Start => "start",
            WorkloadAction::Stop => "stop",
            WorkloadAction::Restart => "restart",
        }
    }
}

/// The device operations the controller depends on. Mocked in deployer
/// tests.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// GET /api/health; Ok means the device answered 2xx.
    async fn health(&self, host: &str, port: u16) -> Result<(), FleetClientError>;

    /// POST /api/reload; returns the device's response body.
    async fn reload(&self, host: &str, port: u16) -> Result<serde_json::Value, FleetClientError>;

    /// POST /api/{action}/{workload}; returns the device's response body.
    async fn workload_action(
        &self,
        host: &str,
        port: u16,
        workload: &str,
        action: WorkloadAction,
    ) -> Result<serde_json::Value, FleetClientError>;

    /// GET /api/logs/{workload}?lines=N; returns the device's response body.
    async fn logs(
        &self,
        host: &str,
        port: u16,
        workload: &str,
        lines: usize,
    ) -> Result<serde_json::Value, FleetClientError>;
}

/// reqwest-backed implementation used in production.
pub struct HttpFleetClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFleetClient {
    /// `token` is the fleet-wide device API token, sent as a bearer.
    pub fn new(token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, token }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, FleetClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| FleetClientError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetClientError::Status { status: status.as_u16(), body });
        }
        response
            .json()
            .await
            .map_err(|e| FleetClientError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl DeviceApi for HttpFleetClient {
    async fn health(&self, host: &str, port: u16) -> Result<(), FleetClientError> {
        let url = format!("http://{host}:{port}/api/health");
        self.execute(self.request(reqwest::Method::GET, url)).await.map(|_| ())
    }

    async fn reload(&self, host: &str, port: u16) -> Result<serde_json::Value, FleetClientError> {
        let url = format!("http://{host}:{port}/api/reload");
        self.execute(self.request(reqwest::Method::POST, url)).await
    }

    async fn workload_action(
        &self,
        host: &str,
        port: u16,
        workload: &str,
        action: WorkloadAction,
    ) -> Result<serde_json::Value, FleetClientError> {
        let url = format!("http://{host}:{port}/api/{}/{workload}", action.as_str());
        self.execute(self.request(reqwest::Method::POST, url)).await
    }

    async fn logs(
        &self,
        host: &str,
        port: u16,
        workload: &str,
        lines: usize,
    ) -> Result<serde_json::Value, FleetClientError> {
        let url = format!("http://{host}:{port}/api/logs/{workload}?lines={lines}");
        let builder = self.request(reqwest::Method::GET, url).timeout(LOGS_TIMEOUT);
        self.execute(builder).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
