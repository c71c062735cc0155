// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{shell_spec, supervisor, wait_for_status};
use mc_core::{RunMode, SystemClock};

#[test]
fn own_pid_is_alive() {
    assert!(pid_alive(std::process::id()));
}

#[tokio::test]
async fn reaped_child_is_not_alive() {
    let mut child = tokio::process::Command::new("/bin/true")
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();
    child.wait().await.unwrap();
    assert!(!pid_alive(pid));
}

#[test]
fn rss_warnings_are_rate_limited() {
    let now = Instant::now();
    assert!(should_warn(None, now, RSS_WARN_INTERVAL));
    assert!(!should_warn(Some(now), now + Duration::from_secs(30), RSS_WARN_INTERVAL));
    assert!(should_warn(Some(now), now + Duration::from_secs(60), RSS_WARN_INTERVAL));
}

#[tokio::test]
async fn sweep_snapshots_system_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new());
    registry.insert(supervisor(shell_spec("idle", "exit 0", RunMode::Forever), dir.path()));
    let monitor = HealthMonitor::new(registry, SystemClock, CancellationToken::new());

    monitor.sweep();
    let metrics = *monitor.metrics_cache().lock();
    assert!(metrics.memory_total_mb > 0.0, "metrics = {metrics:?}");
    assert!(metrics.memory_used_mb > 0.0);
    assert!(metrics.memory_used_mb <= metrics.memory_total_mb);
}

#[tokio::test]
async fn liveness_miss_coerces_run_to_failed() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new());
    let sup = supervisor(shell_spec("svc", "sleep 30", RunMode::Schedule), dir.path());
    registry.insert(Arc::clone(&sup));

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, Duration::from_secs(5)).await);

    // Simulate the pid vanishing out from under the supervisor
    sup.notify_process_lost();
    assert!(wait_for_status(&sup, WorkloadStatus::Failed, Duration::from_secs(5)).await);
    assert_eq!(sup.status().last_error.as_deref(), Some("process disappeared"));
}

#[tokio::test]
async fn sweep_ignores_non_running_workloads() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new());
    registry.insert(supervisor(shell_spec("idle", "exit 0", RunMode::Forever), dir.path()));
    let monitor = HealthMonitor::new(Arc::clone(&registry), SystemClock, CancellationToken::new());

    // Registered workload with no pid: nothing to probe, no panic
    monitor.sweep();
    assert_eq!(
        registry.get("idle").unwrap().status().status,
        WorkloadStatus::Registered
    );
}
