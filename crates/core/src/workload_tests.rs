// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

pub(crate) fn spec(name: &str, run_mode: RunMode) -> WorkloadSpec {
    WorkloadSpec {
        name: name.to_string(),
        workload_type: WorkloadType::Service,
        run_mode,
        module: "workers.demo".to_string(),
        entry_point: "run".to_string(),
        params: indexmap::IndexMap::new(),
        version: None,
        schedule: match run_mode {
            RunMode::Schedule => Some("*/5 * * * *".to_string()),
            _ => None,
        },
        max_runs: match run_mode {
            RunMode::NTimes => Some(3),
            _ => None,
        },
        restart_delay_s: 5.0,
        timeout_s: None,
        memory_limit_mb: None,
        cpu_nice: None,
        tags: Default::default(),
    }
}

#[test]
fn valid_specs_pass_validation() {
    for mode in [RunMode::Schedule, RunMode::Forever, RunMode::NTimes] {
        spec("w", mode).validate().unwrap();
    }
}

#[test]
fn schedule_mode_requires_expression() {
    let mut s = spec("tick", RunMode::Schedule);
    s.schedule = None;
    assert_eq!(s.validate(), Err(SpecError::MissingSchedule("tick".into())));
    s.schedule = Some(String::new());
    assert_eq!(s.validate(), Err(SpecError::MissingSchedule("tick".into())));
}

#[test]
fn schedule_rejected_outside_schedule_mode() {
    let mut s = spec("svc", RunMode::Forever);
    s.schedule = Some("* * * * *".into());
    assert_eq!(s.validate(), Err(SpecError::UnexpectedSchedule("svc".into())));
}

#[test]
fn n_times_requires_positive_max_runs() {
    let mut s = spec("batch", RunMode::NTimes);
    s.max_runs = None;
    assert_eq!(s.validate(), Err(SpecError::MissingMaxRuns("batch".into())));
    s.max_runs = Some(0);
    assert_eq!(s.validate(), Err(SpecError::InvalidMaxRuns("batch".into())));
}

#[test]
fn max_runs_rejected_outside_n_times() {
    let mut s = spec("svc", RunMode::Forever);
    s.max_runs = Some(1);
    assert_eq!(s.validate(), Err(SpecError::UnexpectedMaxRuns("svc".into())));
}

#[parameterized(
    floor = { -20, true },
    ceiling = { 19, true },
    below = { -21, false },
    above = { 20, false },
)]
fn cpu_nice_bounds(nice: i32, ok: bool) {
    let mut s = spec("w", RunMode::Forever);
    s.cpu_nice = Some(nice);
    assert_eq!(s.validate().is_ok(), ok);
}

#[test]
fn memory_limit_zero_rejected() {
    let mut s = spec("w", RunMode::Forever);
    s.memory_limit_mb = Some(0);
    assert_eq!(s.validate(), Err(SpecError::InvalidMemoryLimit("w".into())));
    s.memory_limit_mb = Some(1);
    s.validate().unwrap();
}

#[test]
fn negative_restart_delay_rejected() {
    let mut s = spec("w", RunMode::Forever);
    s.restart_delay_s = -0.5;
    assert_eq!(s.validate(), Err(SpecError::InvalidRestartDelay("w".into())));
}

#[test]
fn zero_timeout_rejected() {
    let mut s = spec("w", RunMode::Forever);
    s.timeout_s = Some(0.0);
    assert_eq!(s.validate(), Err(SpecError::InvalidTimeout("w".into())));
}

#[test]
fn empty_name_rejected() {
    let mut s = spec("w", RunMode::Forever);
    s.name = String::new();
    assert_eq!(s.validate(), Err(SpecError::EmptyName));
}

#[test]
fn spec_round_trips_through_json() {
    let s = spec("tick", RunMode::Schedule);
    let json = serde_json::to_string(&s).unwrap();
    let back: WorkloadSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(s, back);
}

#[test]
fn run_mode_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&RunMode::NTimes).unwrap(), "\"n_times\"");
    assert_eq!(RunMode::NTimes.as_str(), "n_times");
}

#[test]
fn unknown_spec_fields_rejected() {
    let err = serde_json::from_str::<WorkloadSpec>(
        r#"{"name":"w","type":"script","run_mode":"forever","module":"m","bogus":1}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("bogus"));
}

#[test]
fn status_parse_inverts_as_str() {
    for status in [
        WorkloadStatus::Registered,
        WorkloadStatus::Starting,
        WorkloadStatus::Running,
        WorkloadStatus::Stopping,
        WorkloadStatus::Stopped,
        WorkloadStatus::Failed,
        WorkloadStatus::Completed,
    ] {
        assert_eq!(WorkloadStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(WorkloadStatus::parse("bogus"), None);
}

#[parameterized(
    registered = { WorkloadStatus::Registered, true, false },
    stopped = { WorkloadStatus::Stopped, true, false },
    failed = { WorkloadStatus::Failed, true, false },
    completed = { WorkloadStatus::Completed, false, false },
    starting = { WorkloadStatus::Starting, false, true },
    running = { WorkloadStatus::Running, false, true },
    stopping = { WorkloadStatus::Stopping, false, true },
)]
fn startable_statuses(status: WorkloadStatus, startable: bool, active: bool) {
    assert_eq!(status.is_startable(), startable);
    assert_eq!(status.is_active(), active);
}

#[test]
fn new_state_is_registered_with_zero_counters() {
    let st = WorkloadState::new();
    assert_eq!(st.status, WorkloadStatus::Registered);
    assert_eq!(st.run_count, 0);
    assert_eq!(st.pid, None);
}

#[test]
fn workload_info_snapshots_spec_and_state() {
    let s = spec("tick", RunMode::Schedule);
    let mut st = WorkloadState::new();
    st.status = WorkloadStatus::Running;
    st.pid = Some(4242);
    st.run_count = 7;
    let info = WorkloadInfo::from_parts(&s, &st);
    assert_eq!(info.name, "tick");
    assert_eq!(info.status, WorkloadStatus::Running);
    assert_eq!(info.pid, Some(4242));
    assert_eq!(info.run_count, 7);
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["type"], "service");
    assert_eq!(json["run_mode"], "schedule");
}
