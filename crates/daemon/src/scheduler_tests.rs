// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{shell_spec, test_ctx, wait_for_status};
use crate::supervisor::Supervisor;
use chrono::TimeZone;
use mc_core::{FakeClock, RunMode, WorkloadStatus};

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, h, m, s).unwrap()
}

fn setup(
    dir: &std::path::Path,
    specs: &[(&str, &str)],
) -> (Arc<Registry<FakeClock>>, Scheduler<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    clock.set_utc(at(10, 0, 30));
    let registry = Arc::new(Registry::new());
    let ctx = test_ctx(clock.clone(), dir);
    let mut spec_list = Vec::new();
    for (name, script) in specs {
        let mut spec = shell_spec(name, script, RunMode::Schedule);
        spec.schedule = Some("* * * * *".to_string());
        registry.insert(Arc::new(Supervisor::new(spec.clone(), ctx.clone())));
        spec_list.push(spec);
    }
    let scheduler = Scheduler::new(Arc::clone(&registry), clock.clone(), CancellationToken::new());
    scheduler.set_specs(&spec_list);
    (registry, scheduler, clock)
}

#[test]
fn heap_orders_by_fire_time_then_insertion() {
    let schedule = mc_config::schedule::parse("* * * * *").unwrap();
    let t1 = at(10, 1, 0);
    let t2 = at(10, 2, 0);
    let mut heap = BinaryHeap::new();
    heap.push(Entry { next_fire: t2, seq: 0, name: "late".into(), schedule: schedule.clone() });
    heap.push(Entry { next_fire: t1, seq: 2, name: "b".into(), schedule: schedule.clone() });
    heap.push(Entry { next_fire: t1, seq: 1, name: "a".into(), schedule });

    let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|e| e.name)).collect();
    assert_eq!(order, ["a", "b", "late"]);
}

#[tokio::test]
async fn nothing_fires_before_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, _clock) = setup(dir.path(), &[("tick", "exit 0")]);

    scheduler.tick().await;
    let sup = registry.get("tick").unwrap();
    assert_eq!(sup.status().run_count, 0);
    assert_eq!(sup.status().status, WorkloadStatus::Registered);
}

#[tokio::test]
async fn due_entry_fires_and_reschedules() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, clock) = setup(dir.path(), &[("tick", "exit 0")]);

    // Cross the 10:01:00 boundary
    clock.advance(Duration::from_secs(45));
    scheduler.tick().await;

    let sup = registry.get("tick").unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Stopped, Duration::from_secs(5)).await);
    assert_eq!(sup.status().run_count, 1);

    // The next slot is rescheduled, not replayed: no extra firing
    // until the clock crosses another minute
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sup.status().run_count, 1);

    clock.advance(Duration::from_secs(60));
    scheduler.tick().await;
    assert!(wait_for_status(&sup, WorkloadStatus::Stopped, Duration::from_secs(5)).await);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while registry.get("tick").unwrap().status().run_count < 2 {
        assert!(std::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn firing_is_dropped_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, clock) = setup(dir.path(), &[("tick", "sleep 30")]);

    clock.advance(Duration::from_secs(45));
    scheduler.tick().await;
    let sup = registry.get("tick").unwrap();
    assert!(wait_for_status(&sup, WorkloadStatus::Running, Duration::from_secs(5)).await);
    let pid = sup.status().pid;

    // Next slot arrives while the first run is still going: dropped
    clock.advance(Duration::from_secs(60));
    scheduler.tick().await;
    assert_eq!(sup.status().status, WorkloadStatus::Running);
    assert_eq!(sup.status().pid, pid);
    assert_eq!(sup.status().run_count, 0);

    sup.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn equal_fire_times_release_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, clock) = setup(dir.path(), &[("first", "exit 0"), ("second", "exit 0")]);

    clock.advance(Duration::from_secs(45));
    scheduler.tick().await;

    for name in ["first", "second"] {
        let sup = registry.get(name).unwrap();
        assert!(
            wait_for_status(&sup, WorkloadStatus::Stopped, Duration::from_secs(5)).await,
            "{name} did not fire"
        );
        assert_eq!(sup.status().run_count, 1, "{name}");
    }
}

#[tokio::test]
async fn removed_workload_entry_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, clock) = setup(dir.path(), &[("tick", "exit 0")]);

    registry.remove("tick");
    clock.advance(Duration::from_secs(45));
    // Must not panic or fire
    scheduler.tick().await;
}

#[tokio::test]
async fn set_specs_replaces_the_heap() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, scheduler, clock) = setup(dir.path(), &[("tick", "exit 0")]);

    // Replace with an empty set; old entry must not fire
    scheduler.set_specs(&[]);
    clock.advance(Duration::from_secs(120));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.get("tick").unwrap().status().run_count, 0);
}
