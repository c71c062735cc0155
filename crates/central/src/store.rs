// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet persistence: clients, their workloads, and deployments.
//!
//! Backed by embedded SQLite. Deployment updates run inside
//! transactions so batch progress is atomic under concurrent readers.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mc_core::{
    ClientOverview, ClientStatus, DeployClientStatus, DeploymentClientRecord, DeploymentRecord,
    DeploymentStatus, HeartbeatPayload, SystemMetrics, WorkloadInfo,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cadence of the stale-detection sweep.
pub const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A client goes `offline` after this many stale thresholds.
const OFFLINE_MULTIPLIER: u32 = 3;

#[derive(Debug, Error)]
pub enum FleetStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed stored record: {0}")]
    Corrupt(String),

    #[error("no such deployment: {0}")]
    DeploymentNotFound(String),
}

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS clients (
    name              TEXT PRIMARY KEY,
    host              TEXT NOT NULL,
    api_port          INTEGER NOT NULL,
    status            TEXT NOT NULL,
    last_seen         TEXT,
    cpu_percent       REAL,
    memory_used_mb    REAL,
    memory_total_mb   REAL,
    disk_used_gb      REAL,
    disk_total_gb     REAL,
    deployed_version  TEXT
);
CREATE TABLE IF NOT EXISTS workloads_by_client (
    client_name    TEXT NOT NULL,
    workload_name  TEXT NOT NULL,
    info           TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    PRIMARY KEY (client_name, workload_name)
);
CREATE TABLE IF NOT EXISTS deployments (
    id              TEXT PRIMARY KEY,
    version         TEXT NOT NULL,
    status          TEXT NOT NULL,
    batch_size      INTEGER NOT NULL,
    target_clients  TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    completed_at    TEXT,
    error           TEXT
);
CREATE TABLE IF NOT EXISTS deployment_clients (
    deployment_id     TEXT NOT NULL,
    client_name       TEXT NOT NULL,
    batch_number      INTEGER NOT NULL,
    status            TEXT NOT NULL,
    previous_version  TEXT,
    started_at        TEXT,
    completed_at      TEXT,
    error             TEXT,
    PRIMARY KEY (deployment_id, client_name)
);
CREATE INDEX IF NOT EXISTS idx_deployments_created
    ON deployments(created_at DESC);
";

/// Embedded fleet store shared across the API and the deployer.
pub struct FleetStore {
    conn: Mutex<Connection>,
}

impl FleetStore {
    pub fn open(path: &Path) -> Result<Self, FleetStoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, FleetStoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ---- clients --------------------------------------------------

    /// Seed client rows from the inventory file. Existing rows keep
    /// their status and metrics; host/port are refreshed.
    pub fn seed_inventory(&self, clients: &[mc_config::InventoryClient]) -> Result<(), FleetStoreError> {
        let conn = self.conn.lock();
        for client in clients {
            conn.execute(
                "INSERT INTO clients (name, host, api_port, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   host = excluded.host,
                   api_port = excluded.api_port",
                params![client.name, client.host, client.api_port, ClientStatus::Offline.as_str()],
            )?;
        }
        Ok(())
    }

    /// Apply a heartbeat: upsert the client row and replace its
    /// workload snapshots, in one transaction.
    pub fn record_heartbeat(
        &self,
        payload: &HeartbeatPayload,
        fallback_host: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), FleetStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let known_host: Option<String> = tx
            .query_row(
                "SELECT host FROM clients WHERE name = ?1",
                params![payload.client_name],
                |row| row.get(0),
            )
            .optional()?;
        let host = known_host
            .or_else(|| fallback_host.map(String::from))
            .unwrap_or_else(|| "unknown".to_string());

        tx.execute(
            "INSERT INTO clients
               (name, host, api_port, status, last_seen, cpu_percent, memory_used_mb,
                memory_total_mb, disk_used_gb, disk_total_gb, deployed_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(name) DO UPDATE SET
               status = excluded.status,
               last_seen = excluded.last_seen,
               cpu_percent = excluded.cpu_percent,
               memory_used_mb = excluded.memory_used_mb,
               memory_total_mb = excluded.memory_total_mb,
               disk_used_gb = excluded.disk_used_gb,
               disk_total_gb = excluded.disk_total_gb,
               deployed_version = excluded.deployed_version",
            params![
                payload.client_name,
                host,
                mc_config::DEFAULT_API_PORT,
                ClientStatus::Online.as_str(),
                now.to_rfc3339(),
                payload.system.cpu_percent,
                payload.system.memory_used_mb,
                payload.system.memory_total_mb,
                payload.system.disk_used_gb,
                payload.system.disk_total_gb,
                payload.deployed_version,
            ],
        )?;

        tx.execute(
            "DELETE FROM workloads_by_client WHERE client_name = ?1",
            params![payload.client_name],
        )?;
        for workload in &payload.workloads {
            let info = serde_json::to_string(workload)
                .map_err(|e| FleetStoreError::Corrupt(e.to_string()))?;
            tx.execute(
                "INSERT INTO workloads_by_client (client_name, workload_name, info, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![payload.client_name, workload.name, info, now.to_rfc3339()],
            )?;
        }

        tx.commit()?;
        debug!(client = %payload.client_name, workloads = payload.workloads.len(), "heartbeat recorded");
        Ok(())
    }

    pub fn list_clients(&self) -> Result<Vec<ClientOverview>, FleetStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.name, c.host, c.api_port, c.status, c.last_seen, c.cpu_percent,
                    c.memory_used_mb, c.memory_total_mb, c.disk_used_gb, c.disk_total_gb,
                    c.deployed_version,
                    (SELECT COUNT(*) FROM workloads_by_client w WHERE w.client_name = c.name)
             FROM clients c ORDER BY c.name",
        )?;
        let rows = stmt.query_map([], row_to_overview)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_client(&self, name: &str) -> Result<Option<ClientOverview>, FleetStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.name, c.host, c.api_port, c.status, c.last_seen, c.cpu_percent,
                    c.memory_used_mb, c.memory_total_mb, c.disk_used_gb, c.disk_total_gb,
                    c.deployed_version,
                    (SELECT COUNT(*) FROM workloads_by_client w WHERE w.client_name = c.name)
             FROM clients c WHERE c.name = ?1",
        )?;
        Ok(stmt.query_row(params![name], row_to_overview).optional()?)
    }

    /// Device API endpoint for a known client.
    pub fn client_endpoint(&self, name: &str) -> Result<Option<(String, u16)>, FleetStoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT host, api_port FROM clients WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    pub fn client_workloads(&self, name: &str) -> Result<Vec<WorkloadInfo>, FleetStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT info FROM workloads_by_client WHERE client_name = ?1 ORDER BY workload_name",
        )?;
        let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let raw = row?;
            out.push(
                serde_json::from_str(&raw).map_err(|e| FleetStoreError::Corrupt(e.to_string()))?,
            );
        }
        Ok(out)
    }

    pub fn get_workload(
        &self,
        client: &str,
        workload: &str,
    ) -> Result<Option<WorkloadInfo>, FleetStoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT info FROM workloads_by_client
                 WHERE client_name = ?1 AND workload_name = ?2",
                params![client, workload],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| FleetStoreError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn online_clients(&self) -> Result<Vec<String>, FleetStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM clients WHERE status = 'online' ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn deployed_version(&self, name: &str) -> Result<Option<String>, FleetStoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT deployed_version FROM clients WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .flatten())
    }

    /// Demote clients whose heartbeats stopped: `stale` past the
    /// threshold, `offline` past three thresholds.
    pub fn mark_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), FleetStoreError> {
        let stale_cutoff = now
            - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::seconds(90));
        let offline_cutoff = now
            - chrono::Duration::from_std(threshold * OFFLINE_MULTIPLIER)
                .unwrap_or_else(|_| chrono::Duration::seconds(270));

        let conn = self.conn.lock();
        let stale = conn.execute(
            "UPDATE clients SET status = 'stale'
             WHERE status = 'online' AND last_seen IS NOT NULL AND last_seen < ?1",
            params![stale_cutoff.to_rfc3339()],
        )?;
        let offline = conn.execute(
            "UPDATE clients SET status = 'offline'
             WHERE status IN ('online', 'stale') AND last_seen IS NOT NULL AND last_seen < ?1",
            params![offline_cutoff.to_rfc3339()],
        )?;
        if stale > 0 || offline > 0 {
            info!(stale, offline, "client staleness updated");
        }
        Ok(())
    }

    /// Background stale sweep, every 10 s until shutdown.
    pub async fn run_stale_sweep(&self, threshold: Duration, shutdown: CancellationToken) {
        info!(threshold_s = threshold.as_secs(), "stale sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STALE_SWEEP_INTERVAL) => {
                    if let Err(e) = self.mark_stale(threshold, Utc::now()) {
                        warn!(error = %e, "stale sweep failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("stale sweep stopped");
                    return;
                }
            }
        }
    }

    // ---- deployments ---------------------------------------------

    /// Persist a new deployment and its per-client records atomically.
    pub fn create_deployment(&self, record: &DeploymentRecord) -> Result<(), FleetStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let targets = serde_json::to_string(&record.target_clients)
            .map_err(|e| FleetStoreError::Corrupt(e.to_string()))?;
        tx.execute(
            "INSERT INTO deployments
               (id, version, status, batch_size, target_clients, created_at,
                started_at, completed_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.version,
                record.status.as_str(),
                record.batch_size,
                targets,
                record.created_at.to_rfc3339(),
                record.started_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.error,
            ],
        )?;
        for client in &record.clients {
            tx.execute(
                "INSERT INTO deployment_clients
                   (deployment_id, client_name, batch_number, status, previous_version,
                    started_at, completed_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    client.client_name,
                    client.batch_number,
                    client.status.as_str(),
                    client.previous_version,
                    client.started_at.map(|t| t.to_rfc3339()),
                    client.completed_at.map(|t| t.to_rfc3339()),
                    client.error,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), FleetStoreError> {
        let conn = self.conn.lock();
        let changed = if status == DeploymentStatus::InProgress {
            conn.execute(
                "UPDATE deployments SET status = ?2, started_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now.to_rfc3339()],
            )?
        } else if status.is_terminal() {
            conn.execute(
                "UPDATE deployments SET status = ?2, completed_at = ?3, error = ?4 WHERE id = ?1",
                params![id, status.as_str(), now.to_rfc3339(), error],
            )?
        } else {
            conn.execute(
                "UPDATE deployments SET status = ?2, error = ?3 WHERE id = ?1",
                params![id, status.as_str(), error],
            )?
        };
        if changed == 0 {
            return Err(FleetStoreError::DeploymentNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_deployment_client_status(
        &self,
        id: &str,
        client: &str,
        status: DeployClientStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), FleetStoreError> {
        let terminal = matches!(
            status,
            DeployClientStatus::Healthy
                | DeployClientStatus::Failed
                | DeployClientStatus::RolledBack
        );
        let conn = self.conn.lock();
        let changed = if status == DeployClientStatus::Deploying {
            conn.execute(
                "UPDATE deployment_clients SET status = ?3, started_at = ?4
                 WHERE deployment_id = ?1 AND client_name = ?2",
                params![id, client, status.as_str(), now.to_rfc3339()],
            )?
        } else if terminal {
            conn.execute(
                "UPDATE deployment_clients SET status = ?3, completed_at = ?4, error = ?5
                 WHERE deployment_id = ?1 AND client_name = ?2",
                params![id, client, status.as_str(), now.to_rfc3339(), error],
            )?
        } else {
            conn.execute(
                "UPDATE deployment_clients SET status = ?3, error = ?4
                 WHERE deployment_id = ?1 AND client_name = ?2",
                params![id, client, status.as_str(), error],
            )?
        };
        if changed == 0 {
            return Err(FleetStoreError::DeploymentNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record the version now running on a client after a successful
    /// sync, so later deployments capture the right previous_version.
    pub fn set_client_version(&self, client: &str, version: &str) -> Result<(), FleetStoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE clients SET deployed_version = ?2 WHERE name = ?1",
            params![client, version],
        )?;
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> Result<Option<DeploymentRecord>, FleetStoreError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT id, version, status, batch_size, target_clients,
                        created_at, started_at, completed_at, error
                 FROM deployments WHERE id = ?1",
                params![id],
                row_to_deployment,
            )
            .optional()?;
        let Some(mut record) = record else { return Ok(None) };

        let mut stmt = conn.prepare(
            "SELECT client_name, batch_number, status, previous_version,
                    started_at, completed_at, error
             FROM deployment_clients WHERE deployment_id = ?1
             ORDER BY batch_number, client_name",
        )?;
        let rows = stmt.query_map(params![id], row_to_deployment_client)?;
        for row in rows {
            record.clients.push(row?);
        }
        Ok(Some(record))
    }

    /// Recent deployments, newest first, without per-client detail.
    pub fn list_deployments(&self, limit: usize) -> Result<Vec<DeploymentRecord>, FleetStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, version, status, batch_size, target_clients,
                    created_at, started_at, completed_at, error
             FROM deployments ORDER BY created_at DESC, id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_deployment)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn deployment_status(&self, id: &str) -> Result<Option<DeploymentStatus>, FleetStoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT status FROM deployments WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => DeploymentStatus::parse(&raw)
                .map(Some)
                .ok_or_else(|| FleetStoreError::Corrupt(format!("deployment status '{raw}'"))),
            None => Ok(None),
        }
    }
}

fn migrate(conn: &Connection) -> Result<(), FleetStoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

fn row_to_overview(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientOverview> {
    let status: String = row.get(3)?;
    let last_seen: Option<String> = row.get(4)?;
    let cpu: Option<f64> = row.get(5)?;
    let system = match cpu {
        Some(cpu_percent) => Some(SystemMetrics {
            cpu_percent,
            memory_used_mb: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
            memory_total_mb: row.get::<_, Option<f64>>(7)?.unwrap_or_default(),
            disk_used_gb: row.get::<_, Option<f64>>(8)?.unwrap_or_default(),
            disk_total_gb: row.get::<_, Option<f64>>(9)?.unwrap_or_default(),
        }),
        None => None,
    };
    Ok(ClientOverview {
        name: row.get(0)?,
        host: row.get(1)?,
        api_port: row.get(2)?,
        status: ClientStatus::parse(&status).unwrap_or(ClientStatus::Offline),
        last_seen: last_seen.and_then(parse_ts),
        system,
        deployed_version: row.get(10)?,
        workload_count: row.get::<_, i64>(11)?.max(0) as u32,
    })
}

fn row_to_deployment(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeploymentRecord> {
    let status: String = row.get(2)?;
    let targets: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let started_at: Option<String> = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;
    Ok(DeploymentRecord {
        id: row.get(0)?,
        version: row.get(1)?,
        status: DeploymentStatus::parse(&status).unwrap_or(DeploymentStatus::Failed),
        batch_size: row.get(3)?,
        target_clients: serde_json::from_str(&targets).unwrap_or_default(),
        created_at: parse_ts(created_at).unwrap_or_default(),
        started_at: started_at.and_then(parse_ts),
        completed_at: completed_at.and_then(parse_ts),
        error: row.get(8)?,
        clients: Vec::new(),
    })
}

fn row_to_deployment_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeploymentClientRecord> {
    let status: String = row.get(2)?;
    let started_at: Option<String> = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    Ok(DeploymentClientRecord {
        client_name: row.get(0)?,
        batch_number: row.get(1)?,
        status: DeployClientStatus::parse(&status).unwrap_or(DeployClientStatus::Failed),
        previous_version: row.get(3)?,
        started_at: started_at.and_then(parse_ts),
        completed_at: completed_at.and_then(parse_ts),
        error: row.get(6)?,
    })
}

fn parse_ts(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw).ok().map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
