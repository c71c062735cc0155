// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workload spec file loading.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mc_core::{RunMode, WorkloadSpec};
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::schedule;

/// Multi-spec file shape: `{workloads: [spec, ...]}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiSpecFile {
    workloads: Vec<WorkloadSpec>,
}

/// Load one YAML file containing either a single spec or a
/// `workloads:` list. Every spec is validated, including cron syntax.
pub fn load_spec_file(path: &Path) -> Result<Vec<WorkloadSpec>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let value: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

    let is_multi = value
        .as_mapping()
        .map_or(false, |m| m.contains_key(&serde_yaml::Value::from("workloads")));

    let specs = if is_multi {
        let multi: MultiSpecFile =
            serde_yaml::from_value(value).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        multi.workloads
    } else {
        let single: WorkloadSpec =
            serde_yaml::from_value(value).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        vec![single]
    };

    for spec in &specs {
        validate_spec(spec, path)?;
    }

    debug!(path = %path.display(), count = specs.len(), "loaded spec file");
    Ok(specs)
}

/// Load every `*.yaml` / `*.yml` under `dir`, in file-name order, and
/// enforce name uniqueness across the whole directory.
pub fn load_spec_dir(dir: &Path) -> Result<Vec<WorkloadSpec>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingDir(dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::Io { path: dir.to_path_buf(), source })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut specs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for path in paths {
        for spec in load_spec_file(&path)? {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName { name: spec.name, path });
            }
            specs.push(spec);
        }
    }
    Ok(specs)
}

fn validate_spec(spec: &WorkloadSpec, path: &Path) -> Result<(), ConfigError> {
    spec.validate().map_err(|source| ConfigError::Spec {
        path: path.to_path_buf(),
        source,
    })?;

    if spec.run_mode == RunMode::Schedule {
        if let Some(expr) = spec.schedule.as_deref() {
            schedule::parse(expr).map_err(|e| ConfigError::InvalidSchedule {
                name: spec.name.clone(),
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "specs_tests.rs"]
mod tests;
