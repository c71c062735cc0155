// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component construction, the hot-reload differ, and ordered shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mc_config::ConfigError;
use mc_core::{Clock, ReloadReport, SystemClock, WorkloadInfo, WorkloadSpec};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::statestore::{PersistedWorkload, StoreWriter};
use crate::supervisor::{Supervisor, SupervisorCtx, SupervisorError, DEFAULT_GRACE};

/// Concrete orchestrator used by the daemon binary.
pub type DaemonOrchestrator = Orchestrator<SystemClock>;

/// Failures from external workload commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no such workload: {0}")]
    NotFound(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("cannot read logs: {0}")]
    Logs(String),
}

pub struct Orchestrator<C: Clock> {
    registry: Arc<Registry<C>>,
    scheduler: Arc<Scheduler<C>>,
    ctx: SupervisorCtx<C>,
    config_dir: PathBuf,
    shutdown: CancellationToken,
    store_writer: Mutex<Option<StoreWriter>>,
    /// Serializes reloads; commands racing a reload see either the old
    /// or the new registry, never a partial diff
    reload_lock: tokio::sync::Mutex<()>,
}

impl<C: Clock> Orchestrator<C> {
    pub fn new(
        config_dir: PathBuf,
        ctx: SupervisorCtx<C>,
        store_writer: Option<StoreWriter>,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&registry),
            ctx.clock.clone(),
            ctx.shutdown.clone(),
        ));
        Arc::new(Self {
            registry,
            scheduler,
            shutdown: ctx.shutdown.clone(),
            ctx,
            config_dir,
            store_writer: Mutex::new(store_writer),
            reload_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn registry(&self) -> Arc<Registry<C>> {
        Arc::clone(&self.registry)
    }

    pub fn scheduler(&self) -> Arc<Scheduler<C>> {
        Arc::clone(&self.scheduler)
    }

    /// Admit the boot-time spec set, seeding counters persisted by a
    /// previous daemon instance, and apply the start-on-boot policy.
    pub async fn boot(
        &self,
        specs: Vec<WorkloadSpec>,
        seeds: HashMap<String, PersistedWorkload>,
    ) {
        for spec in &specs {
            self.admit(spec.clone(), seeds.get(&spec.name)).await;
        }
        self.scheduler.set_specs(&specs);
        info!(workloads = specs.len(), "boot complete");
    }

    async fn admit(&self, spec: WorkloadSpec, seed: Option<&PersistedWorkload>) {
        let start_now = starts_on_boot(&spec);
        let supervisor = Arc::new(Supervisor::new(spec, self.ctx.clone()));
        if let Some(seed) = seed {
            supervisor.seed(seed.run_count, seed.last_error.clone());
        }
        if !self.registry.insert(Arc::clone(&supervisor)) {
            warn!(workload = %supervisor.name(), "duplicate admit ignored");
            return;
        }
        if start_now {
            if let Err(e) = supervisor.start().await {
                warn!(workload = %supervisor.name(), error = %e, "start-on-boot failed");
            }
        }
    }

    /// Re-read the config directory and apply the minimal diff.
    pub async fn reload(&self) -> Result<ReloadReport, ConfigError> {
        let _guard = self.reload_lock.lock().await;
        let new_specs = mc_config::load_spec_dir(&self.config_dir)?;
        Ok(self.apply_specs(new_specs).await)
    }

    /// Diff `new_specs` against the live registry and apply:
    /// insert + start-on-boot for added, stop + remove for removed,
    /// spec swap (restarting active supervisors) for changed.
    pub async fn apply_specs(&self, new_specs: Vec<WorkloadSpec>) -> ReloadReport {
        let mut report = ReloadReport::default();
        let old_names = self.registry.names();
        let new_names: std::collections::BTreeSet<String> =
            new_specs.iter().map(|s| s.name.clone()).collect();

        for name in old_names.difference(&new_names) {
            // Remove from the registry first so a late scheduler firing
            // cannot resurrect the workload mid-stop
            if let Some(supervisor) = self.registry.remove(name) {
                let _ = supervisor.stop(DEFAULT_GRACE).await;
                self.ctx.store.remove_state(name);
                info!(workload = %name, "removed by reload");
                report.removed.push(name.clone());
            }
        }

        for spec in &new_specs {
            match self.registry.get(&spec.name) {
                None => {
                    self.admit(spec.clone(), None).await;
                    report.added.push(spec.name.clone());
                }
                Some(supervisor) => {
                    if supervisor.spec() == *spec {
                        report.unchanged.push(spec.name.clone());
                    } else {
                        let was_active = supervisor.status().status.is_active();
                        self.registry.swap(&spec.name, spec.clone());
                        if was_active {
                            if let Err(e) = supervisor.restart().await {
                                warn!(workload = %spec.name, error = %e, "restart after spec swap failed");
                            }
                        }
                        info!(workload = %spec.name, was_active, "spec swapped by reload");
                        report.restarted.push(spec.name.clone());
                    }
                }
            }
        }

        self.scheduler.set_specs(&new_specs);

        report.added.sort();
        report.removed.sort();
        report.restarted.sort();
        report.unchanged.sort();
        report
    }

    // ---- external commands ---------------------------------------

    pub fn list(&self) -> Vec<WorkloadInfo> {
        self.registry.infos()
    }

    pub fn info(&self, name: &str) -> Option<WorkloadInfo> {
        self.registry.get(name).map(|s| s.info())
    }

    pub async fn start_workload(&self, name: &str) -> Result<(), CommandError> {
        let supervisor =
            self.registry.get(name).ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        supervisor.start().await?;
        Ok(())
    }

    pub async fn stop_workload(&self, name: &str) -> Result<(), CommandError> {
        let supervisor =
            self.registry.get(name).ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        supervisor.stop(DEFAULT_GRACE).await?;
        Ok(())
    }

    pub async fn restart_workload(&self, name: &str) -> Result<(), CommandError> {
        let supervisor =
            self.registry.get(name).ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        supervisor.restart().await?;
        Ok(())
    }

    /// Tail of the workload's log file. `lines` is clamped to [1, 10000].
    pub async fn logs(&self, name: &str, lines: usize) -> Result<Vec<String>, CommandError> {
        if self.registry.get(name).is_none() {
            return Err(CommandError::NotFound(name.to_string()));
        }
        let lines = lines.clamp(1, 10_000);
        let path = self.ctx.logs_dir.join(format!("{name}.log"));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CommandError::Logs(e.to_string())),
        };
        let mut tail: Vec<String> = content.lines().rev().take(lines).map(String::from).collect();
        tail.reverse();
        Ok(tail)
    }

    /// Ordered shutdown: scheduler and health monitor stop via the
    /// shutdown token, every supervisor stops in parallel, then the
    /// store writer drains. Bounded by grace + 2 s + a small constant.
    pub async fn shutdown(&self) {
        info!("daemon shutting down");
        self.shutdown.cancel();

        let mut stops = JoinSet::new();
        for supervisor in self.registry.list() {
            stops.spawn(async move {
                let _ = supervisor.stop(DEFAULT_GRACE).await;
            });
        }
        while stops.join_next().await.is_some() {}

        let writer = self.store_writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.shutdown() {
                warn!(error = %e, "store writer shutdown failed");
            }
        }
        info!("daemon shutdown complete");
    }
}

/// `forever` workloads start automatically at boot and on reload-add;
/// scheduled workloads are armed in the scheduler instead. `n_times`
/// workloads and scripts wait for an explicit start.
fn starts_on_boot(spec: &WorkloadSpec) -> bool {
    spec.run_mode == mc_core::RunMode::Forever
        && spec.workload_type != mc_core::WorkloadType::Script
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
