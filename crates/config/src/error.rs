// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use mc_core::SpecError;
use thiserror::Error;

/// Configuration loading failures.
///
/// Fatal to the load attempt, never to a running daemon: a failed hot
/// reload leaves the live registry untouched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path}: {source}")]
    Spec {
        path: PathBuf,
        #[source]
        source: SpecError,
    },

    #[error("duplicate workload name '{name}' in {path}")]
    DuplicateName { name: String, path: PathBuf },

    #[error("workload '{name}': invalid schedule '{expr}': {reason}")]
    InvalidSchedule {
        name: String,
        expr: String,
        reason: String,
    },

    #[error("config directory {0} does not exist")]
    MissingDir(PathBuf),
}
