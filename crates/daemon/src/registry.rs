// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe mapping from workload name to its supervisor.
//!
//! The supervisor owns the current spec; the registry owns membership.
//! Iteration takes a snapshot under the read lock, so reload sees a
//! consistent view.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mc_core::{Clock, WorkloadInfo, WorkloadSpec};
use parking_lot::RwLock;

use crate::supervisor::Supervisor;

pub struct Registry<C: Clock> {
    entries: RwLock<HashMap<String, Arc<Supervisor<C>>>>,
}

impl<C: Clock> Registry<C> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Supervisor<C>>> {
        self.entries.read().get(name).cloned()
    }

    /// Name-sorted snapshot of all supervisors.
    pub fn list(&self) -> Vec<Arc<Supervisor<C>>> {
        let entries = self.entries.read();
        let mut out: Vec<_> = entries.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Snapshot of (spec, info) pairs for control surfaces.
    pub fn infos(&self) -> Vec<WorkloadInfo> {
        self.list().iter().map(|s| s.info()).collect()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Insert a new supervisor. Returns false (and leaves the registry
    /// untouched) when the name is already present.
    pub fn insert(&self, supervisor: Arc<Supervisor<C>>) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(supervisor.name()) {
            return false;
        }
        entries.insert(supervisor.name().to_string(), supervisor);
        true
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Supervisor<C>>> {
        self.entries.write().remove(name)
    }

    /// Atomic spec swap, preserving the supervisor instance.
    pub fn swap(&self, name: &str, spec: WorkloadSpec) -> bool {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(supervisor) => {
                supervisor.swap_spec(spec);
                true
            }
            None => false,
        }
    }
}

impl<C: Clock> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
