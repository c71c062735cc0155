// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron-triggered firing with at-most-one-active semantics.
//!
//! A min-heap of `(next_fire_time, seq, name)` orders upcoming firings;
//! equal fire times release in insertion order. A firing never preempts
//! an active run: if the workload is still running (or stopping) at
//! fire time, that firing is dropped and the schedule advances.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use mc_core::{Clock, RunMode, WorkloadSpec};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::Registry;
use crate::supervisor::FireOutcome;

/// Upper bound on one sleep so wall-clock jumps are noticed.
const MAX_TICK: Duration = Duration::from_secs(30);

/// Sleep when no schedule-mode workloads exist.
const IDLE_TICK: Duration = Duration::from_secs(300);

struct Entry {
    next_fire: DateTime<Utc>,
    seq: u64,
    name: String,
    schedule: Schedule,
}

// BinaryHeap is a max-heap; reverse the ordering so the earliest fire
// time (then lowest seq) is at the head.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_fire
            .cmp(&self.next_fire)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct HeapState {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

pub struct Scheduler<C: Clock> {
    registry: Arc<Registry<C>>,
    clock: C,
    state: Mutex<HeapState>,
    rebuilt: Notify,
    shutdown: CancellationToken,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(registry: Arc<Registry<C>>, clock: C, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            clock,
            state: Mutex::new(HeapState { heap: BinaryHeap::new(), seq: 0 }),
            rebuilt: Notify::new(),
            shutdown,
        }
    }

    /// Replace the schedule set (boot and every reload).
    pub fn set_specs(&self, specs: &[WorkloadSpec]) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        state.heap.clear();
        for spec in specs {
            if spec.run_mode != RunMode::Schedule {
                continue;
            }
            let Some(expr) = spec.schedule.as_deref() else { continue };
            let schedule = match mc_config::schedule::parse(expr) {
                Ok(s) => s,
                Err(e) => {
                    // Config validation should have caught this
                    error!(workload = %spec.name, expr, error = %e, "unschedulable cron expression");
                    continue;
                }
            };
            if let Some(next_fire) = schedule.after(&now).next() {
                debug!(workload = %spec.name, %next_fire, "scheduled");
                let seq = state.seq;
                state.seq += 1;
                state.heap.push(Entry { next_fire, seq, name: spec.name.clone(), schedule });
            }
        }
        drop(state);
        self.rebuilt.notify_one();
    }

    /// Fire everything due, reschedule each, and return how long to
    /// sleep until the next head.
    pub async fn tick(&self) -> Duration {
        let now = self.clock.now_utc();
        let due: Vec<(String, Schedule)> = {
            let mut state = self.state.lock();
            let mut due = Vec::new();
            while state.heap.peek().map_or(false, |head| head.next_fire <= now) {
                let entry = match state.heap.pop() {
                    Some(e) => e,
                    None => break,
                };
                due.push((entry.name, entry.schedule));
            }
            due
        };

        for (name, schedule) in due {
            self.fire(&name).await;
            // Advance from now, not from the missed slot, so a long run
            // skips firings instead of replaying them
            let now = self.clock.now_utc();
            if let Some(next_fire) = schedule.after(&now).next() {
                let mut state = self.state.lock();
                let seq = state.seq;
                state.seq += 1;
                state.heap.push(Entry { next_fire, seq, name, schedule });
            }
        }

        let state = self.state.lock();
        match state.heap.peek() {
            Some(head) => {
                let until = (head.next_fire - self.clock.now_utc())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                until.min(MAX_TICK)
            }
            None => IDLE_TICK,
        }
    }

    async fn fire(&self, name: &str) {
        let Some(supervisor) = self.registry.get(name) else {
            // Removed by a reload after this entry was queued
            return;
        };
        match supervisor.try_fire().await {
            FireOutcome::Started => {
                info!(workload = %name, "scheduled firing started");
            }
            FireOutcome::Busy => {
                warn!(workload = %name, "firing dropped: previous run still active");
            }
            FireOutcome::SpawnFailed => {
                warn!(workload = %name, "scheduled firing failed to spawn");
            }
        }
    }

    /// Cooperative loop: sleep until the head is due, fire, repeat.
    pub async fn run(&self) {
        info!("scheduler started");
        loop {
            let sleep = self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.rebuilt.notified() => {}
                _ = self.shutdown.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
