// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workload specification and runtime state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of workload, as declared in its spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    /// Long-lived autonomous unit
    Agent,
    /// One-shot or counted task
    Script,
    /// Supervised always-on process
    Service,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Agent => "agent",
            WorkloadType::Script => "script",
            WorkloadType::Service => "service",
        }
    }
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the supervisor runs the workload's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fired by the scheduler from a cron expression
    Schedule,
    /// Restarted on every exit until stopped
    Forever,
    /// Restarted until `max_runs` runs have completed
    NTimes,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Schedule => "schedule",
            RunMode::Forever => "forever",
            RunMode::NTimes => "n_times",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    /// In the registry, never started
    Registered,
    /// Child spawn in progress
    Starting,
    /// Child process alive
    Running,
    /// Termination protocol in progress
    Stopping,
    /// Stopped by request or clean exit
    Stopped,
    /// Last run failed
    Failed,
    /// n_times workload reached max_runs
    Completed,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadStatus::Registered => "registered",
            WorkloadStatus::Starting => "starting",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Stopping => "stopping",
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Failed => "failed",
            WorkloadStatus::Completed => "completed",
        }
    }

    /// Parse from the snake_case form used on the wire and in SQL.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(WorkloadStatus::Registered),
            "starting" => Some(WorkloadStatus::Starting),
            "running" => Some(WorkloadStatus::Running),
            "stopping" => Some(WorkloadStatus::Stopping),
            "stopped" => Some(WorkloadStatus::Stopped),
            "failed" => Some(WorkloadStatus::Failed),
            "completed" => Some(WorkloadStatus::Completed),
            _ => None,
        }
    }

    /// A child process exists or is being created/destroyed.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Starting | WorkloadStatus::Running | WorkloadStatus::Stopping
        )
    }

    /// `start()` is legal from this status. A completed n_times
    /// workload stays completed; run_count never resets.
    pub fn is_startable(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Registered | WorkloadStatus::Stopped | WorkloadStatus::Failed
        )
    }
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable declaration of a workload.
///
/// Parsed from a YAML spec file; validated with [`WorkloadSpec::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    /// Unique name across the registry
    pub name: String,
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,
    pub run_mode: RunMode,
    /// Opaque handle the executor resolves to a callable
    pub module: String,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Invocation arguments, passed through to the executor
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Cron expression; required iff `run_mode = schedule`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Required iff `run_mode = n_times`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_s: f64,
    /// Wall-clock cap on a single run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
    /// Address-space ceiling applied before exec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    /// Niceness delta applied before exec, in [-20, 19]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_nice: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

fn default_entry_point() -> String {
    "run".to_string()
}

fn default_restart_delay() -> f64 {
    5.0
}

/// Cross-field validation failures for a single spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("workload '{0}': run_mode=schedule requires a schedule expression")]
    MissingSchedule(String),

    #[error("workload '{0}': schedule is only valid with run_mode=schedule")]
    UnexpectedSchedule(String),

    #[error("workload '{0}': run_mode=n_times requires max_runs > 0")]
    MissingMaxRuns(String),

    #[error("workload '{0}': max_runs is only valid with run_mode=n_times")]
    UnexpectedMaxRuns(String),

    #[error("workload '{0}': max_runs must be > 0")]
    InvalidMaxRuns(String),

    #[error("workload '{0}': restart_delay_s must be >= 0")]
    InvalidRestartDelay(String),

    #[error("workload '{0}': timeout_s must be > 0")]
    InvalidTimeout(String),

    #[error("workload '{0}': memory_limit_mb must be > 0")]
    InvalidMemoryLimit(String),

    #[error("workload '{0}': cpu_nice must be in [-20, 19], got {1}")]
    InvalidNice(String, i32),

    #[error("workload name must not be empty")]
    EmptyName,
}

impl WorkloadSpec {
    /// Enforce the cross-field rules shared by config loading and hot reload.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        match self.run_mode {
            RunMode::Schedule => {
                if self.schedule.as_deref().map_or(true, str::is_empty) {
                    return Err(SpecError::MissingSchedule(self.name.clone()));
                }
            }
            _ => {
                if self.schedule.is_some() {
                    return Err(SpecError::UnexpectedSchedule(self.name.clone()));
                }
            }
        }
        match self.run_mode {
            RunMode::NTimes => match self.max_runs {
                None => return Err(SpecError::MissingMaxRuns(self.name.clone())),
                Some(0) => return Err(SpecError::InvalidMaxRuns(self.name.clone())),
                Some(_) => {}
            },
            _ => {
                if self.max_runs.is_some() {
                    return Err(SpecError::UnexpectedMaxRuns(self.name.clone()));
                }
            }
        }
        if !self.restart_delay_s.is_finite() || self.restart_delay_s < 0.0 {
            return Err(SpecError::InvalidRestartDelay(self.name.clone()));
        }
        if let Some(t) = self.timeout_s {
            if !t.is_finite() || t <= 0.0 {
                return Err(SpecError::InvalidTimeout(self.name.clone()));
            }
        }
        if self.memory_limit_mb == Some(0) {
            return Err(SpecError::InvalidMemoryLimit(self.name.clone()));
        }
        if let Some(nice) = self.cpu_nice {
            if !(-20..=19).contains(&nice) {
                return Err(SpecError::InvalidNice(self.name.clone(), nice));
            }
        }
        Ok(())
    }
}

/// Mutable runtime companion of a [`WorkloadSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stopped: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkloadState {
    pub fn new() -> Self {
        Self {
            status: WorkloadStatus::Registered,
            pid: None,
            run_count: 0,
            consecutive_failures: 0,
            last_started: None,
            last_stopped: None,
            last_heartbeat: None,
            last_error: None,
        }
    }
}

impl Default for WorkloadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot DTO shared by heartbeats, fleet queries, and the device API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,
    pub run_mode: RunMode,
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkloadInfo {
    pub fn from_parts(spec: &WorkloadSpec, state: &WorkloadState) -> Self {
        Self {
            name: spec.name.clone(),
            workload_type: spec.workload_type,
            run_mode: spec.run_mode,
            status: state.status,
            pid: state.pid,
            run_count: state.run_count,
            last_started: state.last_started,
            last_error: state.last_error.clone(),
        }
    }
}

/// Outcome of a hot reload: which names changed and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReloadReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restarted.is_empty()
    }
}

#[cfg(test)]
#[path = "workload_tests.rs"]
mod tests;
