// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests.

use std::sync::Arc;
use std::time::Duration;

use mc_core::{Clock, RunMode, SystemClock, WorkloadSpec, WorkloadStatus, WorkloadType};
use tokio_util::sync::CancellationToken;

use crate::statestore::StoreHandle;
use crate::supervisor::{Supervisor, SupervisorCtx, WorkloadExecutor};

/// Runs the workload as `/bin/sh -c <script>`, ignoring the module
/// reference entirely.
pub(crate) struct ShellExecutor;

impl WorkloadExecutor for ShellExecutor {
    fn command(&self, spec: &WorkloadSpec) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg(&spec.module);
        cmd
    }
}

/// Spec whose `module` is a shell script body (see [`ShellExecutor`]).
pub(crate) fn shell_spec(name: &str, script: &str, run_mode: RunMode) -> WorkloadSpec {
    WorkloadSpec {
        name: name.to_string(),
        workload_type: WorkloadType::Service,
        run_mode,
        module: script.to_string(),
        entry_point: "run".to_string(),
        params: Default::default(),
        version: None,
        schedule: match run_mode {
            RunMode::Schedule => Some("* * * * *".to_string()),
            _ => None,
        },
        max_runs: match run_mode {
            RunMode::NTimes => Some(1),
            _ => None,
        },
        restart_delay_s: 0.01,
        timeout_s: None,
        memory_limit_mb: None,
        cpu_nice: None,
        tags: Default::default(),
    }
}

pub(crate) fn test_ctx<C: Clock>(
    clock: C,
    logs_dir: &std::path::Path,
) -> SupervisorCtx<C> {
    SupervisorCtx {
        executor: Arc::new(ShellExecutor),
        store: StoreHandle::discard(),
        logs_dir: logs_dir.to_path_buf(),
        clock,
        shutdown: CancellationToken::new(),
    }
}

pub(crate) fn system_ctx(logs_dir: &std::path::Path) -> SupervisorCtx<SystemClock> {
    test_ctx(SystemClock, logs_dir)
}

pub(crate) fn supervisor(
    spec: WorkloadSpec,
    logs_dir: &std::path::Path,
) -> Arc<Supervisor<SystemClock>> {
    Arc::new(Supervisor::new(spec, system_ctx(logs_dir)))
}

/// Poll until the workload reaches `status` or the deadline passes.
pub(crate) async fn wait_for_status<C: Clock>(
    supervisor: &Supervisor<C>,
    status: WorkloadStatus,
    deadline: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if supervisor.status().status == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
