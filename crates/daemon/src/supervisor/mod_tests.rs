// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{shell_spec, supervisor, wait_for_status};
use mc_core::RunMode;
use yare::parameterized;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn single_run_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("once", "exit 0", RunMode::NTimes), dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Completed, WAIT).await);

    let state = sup.status();
    assert_eq!(state.run_count, 1);
    assert_eq!(state.pid, None);
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn n_times_runs_exactly_max_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = shell_spec("three", "exit 0", RunMode::NTimes);
    spec.max_runs = Some(3);
    let sup = supervisor(spec, dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Completed, WAIT).await);
    assert_eq!(sup.status().run_count, 3);

    // No further starts: completed workloads refuse to start
    match sup.start().await {
        Err(SupervisorError::Completed { .. }) => {}
        other => panic!("expected Completed, got {other:?}"),
    }
    assert_eq!(sup.status().run_count, 3);
}

#[tokio::test]
async fn forever_restarts_after_clean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("loop", "exit 0", RunMode::Forever), dir.path());

    sup.start().await.unwrap();
    let deadline = std::time::Instant::now() + WAIT;
    while sup.status().run_count < 2 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sup.status().run_count >= 2, "never restarted: {:?}", sup.status());

    sup.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(sup.status().status, WorkloadStatus::Stopped);
}

#[tokio::test]
async fn stop_terminates_a_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("svc", "sleep 30", RunMode::Forever), dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, WAIT).await);
    let pid = sup.status().pid.unwrap();

    sup.stop(Duration::from_secs(2)).await.unwrap();
    let state = sup.status();
    assert_eq!(state.status, WorkloadStatus::Stopped);
    assert_eq!(state.pid, None);
    assert!(!crate::health::pid_alive(pid));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("svc", "sleep 30", RunMode::Forever), dir.path());

    sup.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(sup.status().status, WorkloadStatus::Registered);

    sup.start().await.unwrap();
    sup.stop(Duration::from_secs(1)).await.unwrap();
    sup.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(sup.status().status, WorkloadStatus::Stopped);
}

#[tokio::test]
async fn restart_yields_a_new_pid() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("svc", "sleep 30", RunMode::Forever), dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, WAIT).await);
    let first_pid = sup.status().pid.unwrap();

    sup.restart().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, WAIT).await);
    let second_pid = sup.status().pid.unwrap();
    assert_ne!(first_pid, second_pid);

    sup.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn start_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("svc", "sleep 30", RunMode::Forever), dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, WAIT).await);
    match sup.start().await {
        Err(SupervisorError::NotStartable { status, .. }) => {
            assert_eq!(status, WorkloadStatus::Running);
        }
        other => panic!("expected NotStartable, got {other:?}"),
    }
    sup.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn failed_run_captures_stderr_tail() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(
        shell_spec("bad", "echo boom >&2; exit 3", RunMode::NTimes),
        dir.path(),
    );

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Failed, WAIT).await);

    let state = sup.status();
    assert_eq!(state.run_count, 1);
    assert_eq!(state.consecutive_failures, 1);
    assert!(
        state.last_error.as_deref().unwrap_or_default().contains("boom"),
        "last_error = {:?}",
        state.last_error
    );
}

#[tokio::test]
async fn spawn_failure_is_reported_and_terminal() {
    struct BrokenExecutor;
    impl WorkloadExecutor for BrokenExecutor {
        fn command(&self, _spec: &WorkloadSpec) -> Command {
            Command::new("/nonexistent/mc-worker-binary")
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mut ctx = crate::test_support::system_ctx(dir.path());
    ctx.executor = Arc::new(BrokenExecutor);
    let sup = Arc::new(Supervisor::new(
        shell_spec("ghost", "unused", RunMode::Forever),
        ctx,
    ));

    match sup.start().await {
        Err(SupervisorError::Spawn { .. }) => {}
        other => panic!("expected Spawn error, got {other:?}"),
    }
    // No auto-retry after a spawn failure
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = sup.status();
    assert_eq!(state.status, WorkloadStatus::Failed);
    assert_eq!(state.run_count, 0);
}

#[tokio::test]
async fn timeout_coerces_to_failed_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = shell_spec("slow", "sleep 30", RunMode::NTimes);
    spec.timeout_s = Some(0.2);
    let sup = supervisor(spec, dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Failed, WAIT).await);
    let state = sup.status();
    assert_eq!(state.last_error.as_deref(), Some("timeout"));
    assert_eq!(state.run_count, 1);
}

#[tokio::test]
async fn schedule_mode_never_restarts_itself() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("tick", "exit 0", RunMode::Schedule), dir.path());

    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Stopped, WAIT).await);
    assert_eq!(sup.status().run_count, 1);

    // Stays stopped until the next firing
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sup.status().run_count, 1);
}

#[tokio::test]
async fn try_fire_drops_when_active() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = shell_spec("tick", "sleep 30", RunMode::Schedule);
    spec.schedule = Some("* * * * *".to_string());
    let sup = supervisor(spec, dir.path());

    assert_eq!(sup.try_fire().await, FireOutcome::Started);
    assert!(wait_for_status(&sup, WorkloadStatus::Running, WAIT).await);
    let pid = sup.status().pid;

    assert_eq!(sup.try_fire().await, FireOutcome::Busy);
    assert_eq!(sup.status().pid, pid);

    sup.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn swap_spec_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("svc", "exit 0", RunMode::NTimes), dir.path());
    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Completed, WAIT).await);

    let mut new_spec = shell_spec("svc", "exit 1", RunMode::NTimes);
    new_spec.max_runs = Some(5);
    sup.swap_spec(new_spec.clone());
    assert_eq!(sup.spec(), new_spec);
    assert_eq!(sup.status().run_count, 1);
}

#[tokio::test]
async fn seed_restores_counters_not_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = shell_spec("svc", "exit 0", RunMode::NTimes);
    spec.max_runs = Some(5);
    let sup = supervisor(spec, dir.path());
    sup.seed(4, Some("old failure".into()));

    let state = sup.status();
    assert_eq!(state.status, WorkloadStatus::Registered);
    assert_eq!(state.run_count, 4);
    assert_eq!(state.last_error.as_deref(), Some("old failure"));
}

#[tokio::test]
async fn seed_at_max_runs_marks_completed() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(shell_spec("once", "exit 0", RunMode::NTimes), dir.path());
    sup.seed(1, None);
    assert_eq!(sup.status().status, WorkloadStatus::Completed);
}

#[parameterized(
    first = { 1.0, 1, 1 },
    second = { 1.0, 2, 2 },
    third = { 1.0, 3, 4 },
    ninth = { 1.0, 9, 256 },
    capped = { 1.0, 10, 300 },
    deep = { 1.0, 30, 300 },
    base_five = { 5.0, 1, 5 },
    base_five_capped = { 5.0, 8, 300 },
)]
fn backoff_ladder(base_s: f64, failures: u32, expected_s: u64) {
    assert_eq!(effective_delay(base_s, failures), Duration::from_secs(expected_s));
}

#[test]
fn backoff_caps_at_five_minutes() {
    assert_eq!(effective_delay(1.0, u32::MAX), MAX_BACKOFF);
}

#[tokio::test]
async fn child_stdout_lands_in_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(
        shell_spec("chatty", "echo hello-from-workload", RunMode::NTimes),
        dir.path(),
    );
    sup.start().await.unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Completed, WAIT).await);

    // stdout flushes on child exit
    let log_path = dir.path().join("chatty.log");
    let deadline = std::time::Instant::now() + WAIT;
    loop {
        let content = std::fs::read_to_string(&log_path).unwrap_or_default();
        if content.contains("hello-from-workload") {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "log never written: {content:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
