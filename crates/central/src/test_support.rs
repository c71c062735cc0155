// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for controller tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mc_core::{HeartbeatPayload, SystemMetrics};
use parking_lot::Mutex;

use crate::client::{DeviceApi, FleetClientError, WorkloadAction};
use crate::deploy::SyncRunner;
use crate::store::FleetStore;

/// Scriptable device fleet: hosts answer health after a configurable
/// number of failures, or never.
#[derive(Default)]
pub(crate) struct MockDevices {
    /// host -> remaining health failures before turning green
    pub health_failures: Mutex<HashMap<String, u32>>,
    pub always_unhealthy: Mutex<HashSet<String>>,
    pub reloads: Mutex<Vec<String>>,
}

#[async_trait]
impl DeviceApi for MockDevices {
    async fn health(&self, host: &str, _port: u16) -> Result<(), FleetClientError> {
        if self.always_unhealthy.lock().contains(host) {
            return Err(FleetClientError::Unreachable(format!("{host} is down")));
        }
        let mut failures = self.health_failures.lock();
        match failures.get_mut(host) {
            Some(0) | None => Ok(()),
            Some(remaining) => {
                *remaining -= 1;
                Err(FleetClientError::Unreachable(format!("{host} warming up")))
            }
        }
    }

    async fn reload(&self, host: &str, _port: u16) -> Result<serde_json::Value, FleetClientError> {
        self.reloads.lock().push(host.to_string());
        Ok(serde_json::json!({ "success": true }))
    }

    async fn workload_action(
        &self,
        host: &str,
        _port: u16,
        workload: &str,
        action: WorkloadAction,
    ) -> Result<serde_json::Value, FleetClientError> {
        Ok(serde_json::json!({
            "success": true,
            "message": format!("{} {workload} on {host}", action.as_str()),
        }))
    }

    async fn logs(
        &self,
        _host: &str,
        _port: u16,
        workload: &str,
        _lines: usize,
    ) -> Result<serde_json::Value, FleetClientError> {
        Ok(serde_json::json!({ "name": workload, "lines": ["line"] }))
    }
}

/// Records sync invocations; configured (client, version) pairs fail.
#[derive(Default)]
pub(crate) struct MockSync {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail_for: Mutex<HashSet<(String, String)>>,
}

#[async_trait]
impl SyncRunner for MockSync {
    async fn sync(&self, client: &str, version: &str) -> Result<(), String> {
        self.calls.lock().push((client.to_string(), version.to_string()));
        if self.fail_for.lock().contains(&(client.to_string(), version.to_string())) {
            return Err(format!("sync exited with 1: rsync to {client} failed"));
        }
        Ok(())
    }
}

pub(crate) fn heartbeat(name: &str, version: Option<&str>) -> HeartbeatPayload {
    HeartbeatPayload {
        client_name: name.to_string(),
        timestamp: Utc::now(),
        deployed_version: version.map(String::from),
        workloads: Vec::new(),
        system: SystemMetrics {
            cpu_percent: 5.0,
            memory_used_mb: 200.0,
            memory_total_mb: 1024.0,
            disk_used_gb: 2.0,
            disk_total_gb: 32.0,
        },
    }
}

/// In-memory store with `names` online, each at `version`. The mock
/// endpoint host equals the client name.
pub(crate) fn store_with_online(
    names: &[&str],
    version: Option<&str>,
) -> Arc<FleetStore> {
    let store = Arc::new(FleetStore::open_in_memory().unwrap());
    for name in names {
        store
            .record_heartbeat(&heartbeat(name, version), Some(name), Utc::now())
            .unwrap();
    }
    store
}
