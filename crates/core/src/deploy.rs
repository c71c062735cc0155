// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling deployment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a whole deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeploymentStatus::Pending),
            "in_progress" => Some(DeploymentStatus::InProgress),
            "completed" => Some(DeploymentStatus::Completed),
            "failed" => Some(DeploymentStatus::Failed),
            "rolling_back" => Some(DeploymentStatus::RollingBack),
            "rolled_back" => Some(DeploymentStatus::RolledBack),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }

    /// Cancellation is honored only before the deployment settles.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, DeploymentStatus::Pending | DeploymentStatus::InProgress)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one client within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployClientStatus {
    Pending,
    Deploying,
    Deployed,
    Healthy,
    Failed,
    RolledBack,
}

impl DeployClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployClientStatus::Pending => "pending",
            DeployClientStatus::Deploying => "deploying",
            DeployClientStatus::Deployed => "deployed",
            DeployClientStatus::Healthy => "healthy",
            DeployClientStatus::Failed => "failed",
            DeployClientStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeployClientStatus::Pending),
            "deploying" => Some(DeployClientStatus::Deploying),
            "deployed" => Some(DeployClientStatus::Deployed),
            "healthy" => Some(DeployClientStatus::Healthy),
            "failed" => Some(DeployClientStatus::Failed),
            "rolled_back" => Some(DeployClientStatus::RolledBack),
            _ => None,
        }
    }

    /// The new version reached this client, so rollback must revert it.
    pub fn needs_rollback(&self) -> bool {
        matches!(
            self,
            DeployClientStatus::Deployed | DeployClientStatus::Healthy | DeployClientStatus::Failed
        )
    }
}

impl std::fmt::Display for DeployClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-client progress within a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentClientRecord {
    pub client_name: String,
    pub batch_number: u32,
    pub status: DeployClientStatus,
    /// Version on the client before this deployment, for rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A rolling deployment across a set of clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub version: String,
    pub status: DeploymentStatus,
    pub batch_size: u32,
    /// Deploy order; batches are contiguous slices of this list
    pub target_clients: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub clients: Vec<DeploymentClientRecord>,
}

/// Input for creating a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub version: String,
    /// Defaults to every client currently online
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_clients: Option<Vec<String>>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout_s: u64,
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,
}

fn default_batch_size() -> u32 {
    1
}

fn default_health_timeout() -> u64 {
    60
}

fn default_auto_rollback() -> bool {
    true
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
