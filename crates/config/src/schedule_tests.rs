// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{TimeZone, Timelike, Utc};
use yare::parameterized;

use super::*;

#[parameterized(
    every_minute = { "* * * * *" },
    every_five = { "*/5 * * * *" },
    daily = { "0 3 * * *" },
    six_field = { "0 * * * * *" },
    seven_field = { "0 0 4 * * * *" },
)]
fn accepts_common_forms(expr: &str) {
    parse(expr).unwrap();
}

#[parameterized(
    empty = { "" },
    word = { "never" },
    too_many = { "* * * * * * * *" },
    bad_field = { "61 * * * *" },
)]
fn rejects_malformed(expr: &str) {
    assert!(parse(expr).is_err());
}

#[test]
fn five_field_fires_at_second_zero() {
    let schedule = parse("*/5 * * * *").unwrap();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 30).unwrap();
    let next = schedule.after(&now).next().unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    assert_eq!(next.second(), 0);
}

#[test]
fn every_minute_advances_by_one_minute() {
    let schedule = parse("* * * * *").unwrap();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 0).unwrap();
    let mut fires = schedule.after(&now);
    assert_eq!(fires.next().unwrap(), Utc.with_ymd_and_hms(2026, 1, 1, 10, 3, 0).unwrap());
    assert_eq!(fires.next().unwrap(), Utc.with_ymd_and_hms(2026, 1, 1, 10, 4, 0).unwrap());
}
