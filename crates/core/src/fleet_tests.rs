// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::workload::{RunMode, WorkloadStatus, WorkloadType};

#[test]
fn client_status_parse_inverts_as_str() {
    for s in [ClientStatus::Online, ClientStatus::Stale, ClientStatus::Offline] {
        assert_eq!(ClientStatus::parse(s.as_str()), Some(s));
    }
    assert_eq!(ClientStatus::parse(""), None);
}

#[test]
fn heartbeat_payload_wire_shape() {
    let payload = HeartbeatPayload {
        client_name: "edge-01".into(),
        timestamp: Utc::now(),
        deployed_version: Some("1.4.0".into()),
        workloads: vec![WorkloadInfo {
            name: "tick".into(),
            workload_type: WorkloadType::Script,
            run_mode: RunMode::Schedule,
            status: WorkloadStatus::Stopped,
            pid: None,
            run_count: 12,
            last_started: None,
            last_error: None,
        }],
        system: SystemMetrics {
            cpu_percent: 12.5,
            memory_used_mb: 412.0,
            memory_total_mb: 1024.0,
            disk_used_gb: 3.1,
            disk_total_gb: 29.7,
        },
    };
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["client_name"], "edge-01");
    assert_eq!(json["workloads"][0]["type"], "script");
    assert_eq!(json["system"]["memory_total_mb"], 1024.0);

    let back: HeartbeatPayload = serde_json::from_value(json).unwrap();
    assert_eq!(back, payload);
}
