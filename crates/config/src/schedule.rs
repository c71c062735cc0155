// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron expression parsing shared by config validation and the scheduler.

use std::str::FromStr;

use cron::Schedule;

/// Parse a cron expression, accepting the classic five-field form.
///
/// The `cron` crate wants a seconds field; five-field input is
/// normalized by prefixing `0` so `* * * * *` fires at second zero of
/// each minute. Six- and seven-field expressions pass through.
pub fn parse(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&normalize(expr))
}

fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
