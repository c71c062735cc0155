// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon-level configuration (`daemon.yaml`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Default device control API port.
pub const DEFAULT_API_PORT: u16 = 8421;

/// Optional daemon configuration with the `fleet:` and `central:`
/// sections. A missing file yields the all-defaults config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub fleet: Option<FleetSection>,
    #[serde(default)]
    pub central: Option<CentralSection>,
}

/// Device-side fleet membership: how this daemon reports to and is
/// reached by the central controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetSection {
    #[serde(default)]
    pub enabled: bool,
    pub client_name: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub central_api_url: Option<String>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_s: u64,
    #[serde(default)]
    pub api_token: Option<String>,
}

/// Controller-side settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CentralSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_central_port")]
    pub port: u16,
    pub db_path: PathBuf,
    #[serde(default)]
    pub inventory_path: Option<PathBuf>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_s: u64,
    #[serde(default)]
    pub deploy_script_path: Option<PathBuf>,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_central_port() -> u16 {
    8420
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_threshold() -> u64 {
    90
}

impl DaemonConfig {
    /// Load `daemon.yaml`; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io { path: path.to_path_buf(), source });
            }
        };
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
