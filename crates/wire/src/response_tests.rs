// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mc_core::{RunMode, WorkloadInfo, WorkloadStatus, WorkloadType};

fn info(name: &str) -> WorkloadInfo {
    WorkloadInfo {
        name: name.into(),
        workload_type: WorkloadType::Service,
        run_mode: RunMode::Forever,
        status: WorkloadStatus::Running,
        pid: Some(100),
        run_count: 1,
        last_started: None,
        last_error: None,
    }
}

#[test]
fn bare_ok_has_only_status_field() {
    let json = serde_json::to_value(Response::ok()).unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok"}));
}

#[test]
fn error_carries_message() {
    let json = serde_json::to_value(Response::error("no such workload")).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "no such workload");
}

#[test]
fn ack_flattens_into_ok() {
    let json = serde_json::to_value(Response::ack("started tick")).unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok", "message": "started tick"}));
}

#[test]
fn workload_list_round_trips() {
    let resp = Response::Ok {
        body: Some(ResponseBody::Workloads { workloads: vec![info("a"), info("b")] }),
    };
    let json = serde_json::to_string(&resp).unwrap();
    let back: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(back, resp);
}

#[test]
fn logs_round_trip() {
    let resp = Response::Ok {
        body: Some(ResponseBody::Logs {
            name: "tick".into(),
            lines: vec!["one".into(), "two".into()],
        }),
    };
    let json = serde_json::to_string(&resp).unwrap();
    let back: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(back, resp);
}

#[test]
fn reload_report_round_trips() {
    let resp = Response::Ok {
        body: Some(ResponseBody::Reload {
            changes: mc_core::ReloadReport {
                added: vec!["d".into()],
                removed: vec!["a".into()],
                restarted: vec!["c".into()],
                unchanged: vec!["b".into()],
            },
        }),
    };
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["changes"]["added"][0], "d");
    let back: Response = serde_json::from_value(json).unwrap();
    assert_eq!(back, resp);
}
