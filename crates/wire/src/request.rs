// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Request from a local client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    /// All workload snapshots
    List,

    /// One workload snapshot
    Status { name: String },

    Start { name: String },

    Stop { name: String },

    Restart { name: String },

    /// Tail of a workload's log file
    Logs {
        name: String,
        #[serde(default = "default_lines")]
        lines: usize,
    },

    /// Re-read the config directory and apply the diff
    ReloadConfigs,

    /// Stop all workloads and exit
    Shutdown,
}

fn default_lines() -> usize {
    50
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
