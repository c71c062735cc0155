// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_returns_increasing_time() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn fake_clock_advances_both_timelines() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let u1 = clock.now_utc();
    clock.advance(Duration::from_secs(90));
    assert!(clock.now().duration_since(t1) >= Duration::from_secs(90));
    assert_eq!(clock.now_utc() - u1, chrono::Duration::seconds(90));
}

#[test]
fn fake_clock_is_shared_across_clones() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    clock2.advance(Duration::from_secs(30));
    assert_eq!(clock1.now_utc(), clock2.now_utc());
}

#[test]
fn fake_clock_set_utc() {
    let clock = FakeClock::new();
    let target = chrono::Utc.with_ymd_and_hms(2026, 6, 15, 8, 30, 0).unwrap();
    clock.set_utc(target);
    assert_eq!(clock.now_utc(), target);
}
