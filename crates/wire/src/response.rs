// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mc_core::{ReloadReport, WorkloadInfo};
use serde::{Deserialize, Serialize};

/// Response from daemon to a local client.
///
/// Serializes as `{"status": "ok", ...}` or
/// `{"status": "error", "message": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
        body: Option<ResponseBody>,
    },
    Error { message: String },
}

/// Payload carried by an ok response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponseBody {
    /// `list`
    Workloads { workloads: Vec<WorkloadInfo> },

    /// `status`
    Workload { workload: Box<WorkloadInfo> },

    /// `logs`
    Logs { name: String, lines: Vec<String> },

    /// `reload-configs`
    Reload { changes: ReloadReport },

    /// start/stop/restart/shutdown acknowledgement
    Ack { message: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok { body: None }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Response::Ok { body: Some(ResponseBody::Ack { message: message.into() }) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error { message: message.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
