// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Daemon version (from Cargo.toml)
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: MC_STATE_DIR > XDG_STATE_HOME/mastctl > ~/.local/state/mastctl
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    mc_config::state_dir().ok_or(LifecycleError::NoStateDir)
}

/// Config directory holding workload spec files.
/// MC_CONFIG_DIR > `<state_dir>/configs`
pub fn config_dir(state_dir: &std::path::Path) -> PathBuf {
    std::env::var("MC_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir.join("configs"))
}

/// Default IPC timeout
pub fn ipc_timeout() -> Duration {
    std::env::var("MC_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Worker binary the executor launches for every workload.
/// The workload's module/entry_point/params ride in its environment.
pub fn worker_bin() -> PathBuf {
    std::env::var("MC_WORKER_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("mc-worker"))
}
