// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed (or aborted) run of a workload's child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub workload: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// None when the child never ran or was killed before exiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl RunRecord {
    pub fn new(
        workload: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) -> Self {
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            workload: workload.into(),
            started_at,
            finished_at,
            exit_code,
            error_message,
            duration_ms,
        }
    }

    /// Clean exit: the child ran and returned zero.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.error_message.is_none()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
