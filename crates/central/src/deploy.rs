// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling, health-gated deployments with automatic rollback.
//!
//! Targets are partitioned into batches; within a batch clients deploy
//! concurrently, batches proceed strictly in order, and a failed batch
//! stops the rollout and (when configured) rolls every touched client
//! back to its previous version.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mc_core::{
    DeployClientStatus, DeployRequest, DeploymentClientRecord, DeploymentRecord, DeploymentStatus,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{DeviceApi, FleetClientError};
use crate::store::{FleetStore, FleetStoreError};

/// Health endpoint poll cadence during the gate.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("no target clients (none specified and none online)")]
    NoTargets,

    #[error("batch_size must be >= 1")]
    InvalidBatchSize,

    #[error("no such deployment: {0}")]
    NotFound(String),

    #[error("deployment is {0}, cannot cancel")]
    NotCancellable(DeploymentStatus),

    #[error(transparent)]
    Store(#[from] FleetStoreError),
}

/// Invokes the external file-sync procedure for one client. Exit 0 is
/// success; output is captured for diagnostics.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn sync(&self, client: &str, version: &str) -> Result<(), String>;
}

/// Runs the configured deploy script as
/// `<script> --client <name> --sync-only --version <v>`.
pub struct ScriptSyncRunner {
    script: std::path::PathBuf,
}

impl ScriptSyncRunner {
    pub fn new(script: std::path::PathBuf) -> Self {
        Self { script }
    }
}

#[async_trait]
impl SyncRunner for ScriptSyncRunner {
    async fn sync(&self, client: &str, version: &str) -> Result<(), String> {
        let output = tokio::process::Command::new(&self.script)
            .arg("--client")
            .arg(client)
            .arg("--sync-only")
            .arg("--version")
            .arg(version)
            .output()
            .await
            .map_err(|e| format!("sync script failed to run: {e}"))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(512).collect::<Vec<_>>().into_iter().rev().collect();
        Err(format!(
            "sync exited with {}: {}",
            output.status.code().unwrap_or(-1),
            tail.trim()
        ))
    }
}

/// Stand-in when `deploy_script_path` is not configured: deployments
/// can be created but every sync fails fast with a clear message.
pub struct UnconfiguredSync;

#[async_trait]
impl SyncRunner for UnconfiguredSync {
    async fn sync(&self, _client: &str, _version: &str) -> Result<(), String> {
        Err("deploy_script_path is not configured".to_string())
    }
}

pub struct Deployer {
    store: Arc<FleetStore>,
    api: Arc<dyn DeviceApi>,
    sync: Arc<dyn SyncRunner>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl Deployer {
    pub fn new(store: Arc<FleetStore>, api: Arc<dyn DeviceApi>, sync: Arc<dyn SyncRunner>) -> Arc<Self> {
        Arc::new(Self { store, api, sync, cancels: Mutex::new(HashMap::new()) })
    }

    /// Persist a pending deployment and launch the rollout task.
    pub async fn start(self: &Arc<Self>, request: DeployRequest) -> Result<DeploymentRecord, DeployError> {
        if request.batch_size == 0 {
            return Err(DeployError::InvalidBatchSize);
        }
        let targets = match &request.target_clients {
            Some(targets) if !targets.is_empty() => targets.clone(),
            Some(_) => return Err(DeployError::NoTargets),
            None => self.store.online_clients()?,
        };
        if targets.is_empty() {
            return Err(DeployError::NoTargets);
        }

        let mut clients = Vec::with_capacity(targets.len());
        for (index, name) in targets.iter().enumerate() {
            clients.push(DeploymentClientRecord {
                client_name: name.clone(),
                batch_number: (index as u32) / request.batch_size,
                status: DeployClientStatus::Pending,
                previous_version: self.store.deployed_version(name)?,
                started_at: None,
                completed_at: None,
                error: None,
            });
        }
        let record = DeploymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            version: request.version.clone(),
            status: DeploymentStatus::Pending,
            batch_size: request.batch_size,
            target_clients: targets,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            clients,
        };
        self.store.create_deployment(&record)?;

        let cancel = CancellationToken::new();
        self.cancels.lock().insert(record.id.clone(), cancel.clone());

        let params = RolloutParams {
            health_timeout: Duration::from_secs(request.health_check_timeout_s.max(1)),
            auto_rollback: request.auto_rollback,
        };
        let deployer = Arc::clone(self);
        let run_record = record.clone();
        tokio::spawn(async move {
            deployer.run(run_record, params, cancel).await;
        });

        info!(deployment = %record.id, version = %record.version,
            targets = record.target_clients.len(), "deployment created");
        Ok(record)
    }

    /// Honored only in pending/in_progress. The in-flight batch
    /// finishes its current work before the rollout stops.
    pub fn cancel(&self, id: &str) -> Result<(), DeployError> {
        let status = self
            .store
            .deployment_status(id)?
            .ok_or_else(|| DeployError::NotFound(id.to_string()))?;
        if !status.is_cancellable() {
            return Err(DeployError::NotCancellable(status));
        }
        match self.cancels.lock().get(id) {
            Some(token) => {
                token.cancel();
                info!(deployment = %id, "cancellation requested");
                Ok(())
            }
            None => {
                // No live task (e.g. controller restarted mid-rollout)
                self.store.set_deployment_status(
                    id,
                    DeploymentStatus::Failed,
                    Some("cancelled"),
                    Utc::now(),
                )?;
                Ok(())
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        record: DeploymentRecord,
        params: RolloutParams,
        cancel: CancellationToken,
    ) {
        let id = record.id.clone();
        let outcome = self.run_batches(&record, &params, &cancel).await;
        match outcome {
            Ok(()) => {
                self.finish(&id, DeploymentStatus::Completed, None);
                info!(deployment = %id, "deployment completed");
            }
            Err(error) => {
                warn!(deployment = %id, error = %error, "deployment failed");
                self.failure_branch(&record, params.auto_rollback, &error).await;
            }
        }
        self.cancels.lock().remove(&id);
    }

    async fn run_batches(
        self: &Arc<Self>,
        record: &DeploymentRecord,
        params: &RolloutParams,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        if let Err(e) = self.store.set_deployment_status(
            &record.id,
            DeploymentStatus::InProgress,
            None,
            Utc::now(),
        ) {
            return Err(e.to_string());
        }

        let batch_count = record
            .clients
            .iter()
            .map(|c| c.batch_number + 1)
            .max()
            .unwrap_or(0);

        for batch in 0..batch_count {
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
            let members: Vec<String> = record
                .clients
                .iter()
                .filter(|c| c.batch_number == batch)
                .map(|c| c.client_name.clone())
                .collect();
            info!(deployment = %record.id, batch, clients = members.len(), "batch starting");

            let mut tasks = JoinSet::new();
            for client in members {
                let deployer = Arc::clone(self);
                let id = record.id.clone();
                let version = record.version.clone();
                let timeout = params.health_timeout;
                tasks.spawn(async move {
                    let result = deployer.deploy_client(&id, &client, &version, timeout).await;
                    (client, result)
                });
            }
            let mut batch_ok = true;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((client, Err(error))) => {
                        warn!(deployment = %record.id, client = %client, error = %error, "client deploy failed");
                        batch_ok = false;
                    }
                    Err(e) => {
                        warn!(deployment = %record.id, error = %e, "deploy task panicked");
                        batch_ok = false;
                    }
                }
            }
            if !batch_ok {
                return Err(format!("batch {batch} failed health gate"));
            }
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
        }
        Ok(())
    }

    /// One client: sync, reload, then poll the health endpoint until
    /// success or timeout.
    async fn deploy_client(
        &self,
        id: &str,
        client: &str,
        version: &str,
        health_timeout: Duration,
    ) -> Result<(), String> {
        self.set_client(id, client, DeployClientStatus::Deploying, None);

        if let Err(error) = self.sync.sync(client, version).await {
            self.set_client(id, client, DeployClientStatus::Failed, Some(&error));
            return Err(error);
        }

        let Some((host, port)) = self.endpoint(client) else {
            let error = format!("no known endpoint for client {client}");
            self.set_client(id, client, DeployClientStatus::Failed, Some(&error));
            return Err(error);
        };
        if let Err(e) = self.api.reload(&host, port).await {
            let error = format!("reload failed: {e}");
            self.set_client(id, client, DeployClientStatus::Failed, Some(&error));
            return Err(error);
        }

        if let Err(e) = self.store.set_client_version(client, version) {
            warn!(client = %client, error = %e, "version bookkeeping failed");
        }
        self.set_client(id, client, DeployClientStatus::Deployed, None);

        match self.health_gate(&host, port, health_timeout).await {
            Ok(()) => {
                self.set_client(id, client, DeployClientStatus::Healthy, None);
                Ok(())
            }
            Err(error) => {
                self.set_client(id, client, DeployClientStatus::Failed, Some(&error));
                Err(error)
            }
        }
    }

    async fn health_gate(&self, host: &str, port: u16, timeout: Duration) -> Result<(), String> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_error: Option<FleetClientError> = None;
        loop {
            match self.api.health(host, port).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
            if tokio::time::Instant::now() + HEALTH_POLL_INTERVAL > deadline {
                break;
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
        Err(match last_error {
            Some(e) => format!("health gate timed out: {e}"),
            None => "health gate timed out".to_string(),
        })
    }

    /// Mark the deployment failed or roll back every client the new
    /// version reached, in target order.
    async fn failure_branch(&self, record: &DeploymentRecord, auto_rollback: bool, error: &str) {
        if !auto_rollback {
            self.finish(&record.id, DeploymentStatus::Failed, Some(error));
            return;
        }

        if let Err(e) = self.store.set_deployment_status(
            &record.id,
            DeploymentStatus::RollingBack,
            Some(error),
            Utc::now(),
        ) {
            warn!(deployment = %record.id, error = %e, "status update failed");
        }

        let current = match self.store.get_deployment(&record.id) {
            Ok(Some(current)) => current,
            other => {
                warn!(deployment = %record.id, result = ?other, "cannot load deployment for rollback");
                self.finish(&record.id, DeploymentStatus::RolledBack, Some(error));
                return;
            }
        };

        for client in &current.clients {
            if !client.status.needs_rollback() {
                continue;
            }
            let Some(previous) = client.previous_version.as_deref() else {
                continue;
            };
            match self.rollback_client(&client.client_name, previous).await {
                Ok(()) => {
                    self.set_client(
                        &record.id,
                        &client.client_name,
                        DeployClientStatus::RolledBack,
                        None,
                    );
                }
                Err(rollback_error) => {
                    warn!(deployment = %record.id, client = %client.client_name,
                        error = %rollback_error, "rollback failed");
                    self.set_client(
                        &record.id,
                        &client.client_name,
                        DeployClientStatus::Failed,
                        Some(&rollback_error),
                    );
                }
            }
        }
        self.finish(&record.id, DeploymentStatus::RolledBack, Some(error));
        info!(deployment = %record.id, "rollback complete");
    }

    async fn rollback_client(&self, client: &str, previous: &str) -> Result<(), String> {
        self.sync.sync(client, previous).await?;
        let Some((host, port)) = self.endpoint(client) else {
            return Err(format!("no known endpoint for client {client}"));
        };
        self.api
            .reload(&host, port)
            .await
            .map_err(|e| format!("reload failed: {e}"))?;
        if let Err(e) = self.store.set_client_version(client, previous) {
            warn!(client = %client, error = %e, "version bookkeeping failed");
        }
        Ok(())
    }

    fn endpoint(&self, client: &str) -> Option<(String, u16)> {
        self.store.client_endpoint(client).ok().flatten()
    }

    fn set_client(&self, id: &str, client: &str, status: DeployClientStatus, error: Option<&str>) {
        if let Err(e) =
            self.store.set_deployment_client_status(id, client, status, error, Utc::now())
        {
            warn!(deployment = %id, client = %client, error = %e, "client status update failed");
        }
    }

    fn finish(&self, id: &str, status: DeploymentStatus, error: Option<&str>) {
        if let Err(e) = self.store.set_deployment_status(id, status, error, Utc::now()) {
            warn!(deployment = %id, error = %e, "final status update failed");
        }
    }
}

/// Request tunables the run task needs beyond the persisted record.
#[derive(Debug, Clone, Copy)]
struct RolloutParams {
    health_timeout: Duration,
    auto_rollback: bool,
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
