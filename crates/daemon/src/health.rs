// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness probing, memory-approach warnings, and system metrics.
//!
//! A periodic sweep checks every running workload's pid, warns when a
//! limited workload's resident set approaches its ceiling, and caches
//! a system snapshot for the heartbeat reporter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mc_core::{Clock, SystemMetrics, WorkloadStatus};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use parking_lot::Mutex;
use sysinfo::{Disks, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// Default sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Warn when RSS crosses this fraction of the configured limit.
const RSS_WARN_FRACTION: f64 = 0.9;

/// Minimum spacing between RSS warnings per workload.
const RSS_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Disk stats refresh cadence, in sweeps.
const DISK_REFRESH_SWEEPS: u64 = 15;

pub struct HealthMonitor<C: Clock> {
    registry: Arc<Registry<C>>,
    clock: C,
    shutdown: CancellationToken,
    metrics: Arc<Mutex<SystemMetrics>>,
    system: Mutex<System>,
    last_rss_warn: Mutex<HashMap<String, Instant>>,
    sweeps: Mutex<u64>,
    disk: Mutex<(f64, f64)>,
}

impl<C: Clock> HealthMonitor<C> {
    pub fn new(registry: Arc<Registry<C>>, clock: C, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            clock,
            shutdown,
            metrics: Arc::new(Mutex::new(SystemMetrics::default())),
            system: Mutex::new(System::new()),
            last_rss_warn: Mutex::new(HashMap::new()),
            sweeps: Mutex::new(0),
            disk: Mutex::new((0.0, 0.0)),
        }
    }

    /// Shared cache read by the heartbeat reporter.
    pub fn metrics_cache(&self) -> Arc<Mutex<SystemMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub async fn run(&self) {
        info!("health monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => self.sweep(),
                _ = self.shutdown.cancelled() => {
                    info!("health monitor stopped");
                    return;
                }
            }
        }
    }

    /// One pass: liveness, RSS warnings, metrics snapshot.
    pub fn sweep(&self) {
        let supervisors = self.registry.list();

        let mut limited_pids = Vec::new();
        for supervisor in &supervisors {
            let state = supervisor.status();
            if state.status != WorkloadStatus::Running {
                continue;
            }
            let Some(pid) = state.pid else { continue };

            if !pid_alive(pid) {
                warn!(workload = %supervisor.name(), pid, "process disappeared");
                supervisor.notify_process_lost();
                continue;
            }
            if let Some(limit_mb) = supervisor.spec().memory_limit_mb {
                limited_pids.push((supervisor.name().to_string(), pid, limit_mb));
            }
        }

        self.check_rss(&limited_pids);
        self.snapshot_metrics();
    }

    /// Warn (rate-limited) when a workload's RSS is within 10% of its
    /// address-space ceiling. Skips silently when sampling fails.
    fn check_rss(&self, limited: &[(String, u32, u64)]) {
        if limited.is_empty() {
            return;
        }
        let pids: Vec<sysinfo::Pid> =
            limited.iter().map(|(_, pid, _)| sysinfo::Pid::from_u32(*pid)).collect();
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);

        for (name, pid, limit_mb) in limited {
            let Some(process) = system.process(sysinfo::Pid::from_u32(*pid)) else {
                continue;
            };
            let rss_mb = process.memory() as f64 / (1024.0 * 1024.0);
            let limit = *limit_mb as f64;
            if rss_mb < limit * RSS_WARN_FRACTION {
                continue;
            }
            let now = self.clock.now();
            let mut last = self.last_rss_warn.lock();
            if should_warn(last.get(name).copied(), now, RSS_WARN_INTERVAL) {
                last.insert(name.clone(), now);
                warn!(
                    workload = %name,
                    rss_mb = format!("{rss_mb:.1}"),
                    limit_mb,
                    "resident set approaching memory limit"
                );
            }
        }
    }

    fn snapshot_metrics(&self) {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let sweep = {
            let mut sweeps = self.sweeps.lock();
            *sweeps += 1;
            *sweeps
        };
        if sweep == 1 || sweep % DISK_REFRESH_SWEEPS == 0 {
            *self.disk.lock() = root_disk_usage();
        }
        let (disk_used_gb, disk_total_gb) = *self.disk.lock();

        let snapshot = SystemMetrics {
            cpu_percent: system.global_cpu_usage() as f64,
            memory_used_mb: system.used_memory() as f64 / (1024.0 * 1024.0),
            memory_total_mb: system.total_memory() as f64 / (1024.0 * 1024.0),
            disk_used_gb,
            disk_total_gb,
        };
        debug!(cpu = snapshot.cpu_percent, "system metrics refreshed");
        *self.metrics.lock() = snapshot;
    }
}

/// kill(pid, 0): probe without signalling.
pub(crate) fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn should_warn(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(at) => now.duration_since(at) >= interval,
        None => true,
    }
}

/// Used/total for the filesystem backing `/`, in GB.
fn root_disk_usage() -> (f64, f64) {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next());
    match root {
        Some(disk) => {
            let total = disk.total_space() as f64 / GB;
            let used = (disk.total_space() - disk.available_space()) as f64 / GB;
            (used, total)
        }
        None => (0.0, 0.0),
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
