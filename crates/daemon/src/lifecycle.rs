// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: paths, lock file, socket, store.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use mc_config::DaemonConfig;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::statestore::{
    PersistedWorkload, StateStore, StoreHandle, StoreWriter, DEFAULT_QUEUE_CAPACITY,
};

/// Daemon configuration paths.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/mastctl)
    pub state_dir: PathBuf,
    /// Directory of workload spec files
    pub config_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to the embedded state database
    pub db_path: PathBuf,
    /// Directory of per-workload log files
    pub logs_dir: PathBuf,
    /// Path to `daemon.yaml`
    pub daemon_yaml_path: PathBuf,
    /// Path to the deployed-version marker
    pub version_path: PathBuf,
}

impl Config {
    /// Resolve all paths from the state directory.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir()?;
        Ok(Self {
            config_dir: crate::env::config_dir(&state_dir),
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            db_path: state_dir.join("state.db"),
            logs_dir: state_dir.join("logs"),
            daemon_yaml_path: state_dir.join("daemon.yaml"),
            version_path: state_dir.join("version"),
            state_dir,
        })
    }
}

/// Lifecycle errors. Only store and socket failures are fatal.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] crate::statestore::StoreError),

    #[error("config error: {0}")]
    Config(#[from] mc_config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything `main` needs after startup.
pub struct StartupResult {
    pub config: Config,
    pub daemon_config: DaemonConfig,
    pub listener: UnixListener,
    pub store_handle: StoreHandle,
    pub store_writer: StoreWriter,
    pub seeds: HashMap<String, PersistedWorkload>,
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

/// Create directories, take the exclusive lock, bind the socket, and
/// open the state store.
pub fn startup(config: Config) -> Result<StartupResult, LifecycleError> {
    create_private_dir(&config.state_dir)?;
    create_private_dir(&config.logs_dir)?;
    create_private_dir(&config.config_dir)?;

    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // A previous unclean exit can leave the socket file behind; the
    // lock above proves no other daemon owns it.
    if config.socket_path.exists() {
        warn!(path = %config.socket_path.display(), "removing stale socket");
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let store = StateStore::open(&config.db_path)?;
    let seeds = store.load_states()?;
    let (store_handle, store_writer) = store.into_writer(DEFAULT_QUEUE_CAPACITY);

    let daemon_config = DaemonConfig::load(&config.daemon_yaml_path)?;

    info!(state_dir = %config.state_dir.display(), "daemon startup complete");
    Ok(StartupResult {
        config,
        daemon_config,
        listener,
        store_handle,
        store_writer,
        seeds,
        lock_file,
    })
}

/// Remove the socket and pid files. The lock releases on process exit.
pub fn cleanup(config: &Config) {
    for path in [&config.socket_path, &config.lock_path] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "cleanup failed");
            }
        }
    }
}

fn create_private_dir(path: &PathBuf) -> Result<(), std::io::Error> {
    use std::os::unix::fs::DirBuilderExt;
    match std::fs::DirBuilder::new().recursive(true).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
