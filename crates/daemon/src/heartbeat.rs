// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic heartbeat POSTs to the central controller.
//!
//! Heartbeats are stateless snapshots: a failed send is never queued
//! or retried with old contents. Failures back off exponentially up to
//! five minutes and never crash the daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mc_config::FleetSection;
use mc_core::{Clock, HeartbeatPayload, SystemMetrics};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// Ceiling for the failure backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// HTTP timeouts for the heartbeat POST.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HeartbeatReporter<C: Clock> {
    registry: Arc<Registry<C>>,
    metrics: Arc<Mutex<SystemMetrics>>,
    fleet: FleetSection,
    /// `<state_dir>/version`, maintained by the deploy sync procedure
    version_path: PathBuf,
    clock: C,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl<C: Clock> HeartbeatReporter<C> {
    pub fn new(
        registry: Arc<Registry<C>>,
        metrics: Arc<Mutex<SystemMetrics>>,
        fleet: FleetSection,
        version_path: PathBuf,
        clock: C,
        shutdown: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { registry, metrics, fleet, version_path, clock, client, shutdown }
    }

    /// Current snapshot of this device for the controller.
    pub fn build_payload(&self) -> HeartbeatPayload {
        HeartbeatPayload {
            client_name: self.fleet.client_name.clone(),
            timestamp: self.clock.now_utc(),
            deployed_version: read_version(&self.version_path),
            workloads: self.registry.infos(),
            system: *self.metrics.lock(),
        }
    }

    pub async fn run(&self) {
        let Some(url) = self.fleet.central_api_url.clone() else {
            warn!("fleet enabled but central_api_url missing; heartbeats disabled");
            return;
        };
        let endpoint = format!("{}/api/heartbeat", url.trim_end_matches('/'));
        let interval = Duration::from_secs(self.fleet.heartbeat_interval_s.max(1));
        let mut delay = interval;

        info!(endpoint = %endpoint, interval_s = interval.as_secs(), "heartbeat reporter started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    info!("heartbeat reporter stopped");
                    return;
                }
            }

            match self.send(&endpoint).await {
                Ok(()) => {
                    debug!("heartbeat delivered");
                    delay = interval;
                }
                Err(e) => {
                    warn!(error = %e, next_attempt_s = (delay * 2).min(MAX_BACKOFF).as_secs(),
                        "heartbeat failed");
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn send(&self, endpoint: &str) -> Result<(), reqwest::Error> {
        let payload = self.build_payload();
        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(token) = &self.fleet.api_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

fn read_version(path: &PathBuf) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
