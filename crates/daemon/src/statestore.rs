// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded state persistence for recovery across daemon restarts.
//!
//! All mutations flow through a single writer thread fed by a bounded
//! in-process queue, so supervisor state transitions never block on
//! disk. On overflow the oldest entries are dropped and counted; a
//! lost snapshot is always superseded by the next one.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mc_core::{RunRecord, WorkloadState};
use parking_lot::{Condvar, Mutex};
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{debug, warn};

/// Default write queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Store failures. Write-path errors never surface to supervisors;
/// they are logged and counted by the writer thread.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store writer thread panicked")]
    WriterPanicked,
}

/// Counters seeded into a fresh supervisor at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedWorkload {
    pub run_count: u32,
    pub last_error: Option<String>,
    pub version: Option<String>,
}

enum WriteOp {
    State {
        name: String,
        state: WorkloadState,
        version: Option<String>,
        at: DateTime<Utc>,
    },
    Run(RunRecord),
    Remove {
        name: String,
    },
}

struct QueueInner {
    queue: Mutex<VecDeque<WriteOp>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    closing: AtomicBool,
}

/// Cheap cloneable producer side of the write queue.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<QueueInner>,
}

impl StoreHandle {
    pub fn push_state(&self, name: &str, state: WorkloadState, version: Option<String>) {
        self.push(WriteOp::State {
            name: name.to_string(),
            state,
            version,
            at: Utc::now(),
        });
    }

    pub fn push_run(&self, record: RunRecord) {
        self.push(WriteOp::Run(record));
    }

    pub fn remove_state(&self, name: &str) {
        self.push(WriteOp::Remove { name: name.to_string() });
    }

    /// Entries discarded because the queue was full.
    pub fn dropped_writes(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn push(&self, op: WriteOp) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(op);
        }
        self.inner.available.notify_one();
    }

    /// Test-only: a handle whose writes go nowhere.
    #[cfg(test)]
    pub(crate) fn discard() -> Self {
        StoreHandle {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                capacity: usize::MAX,
                dropped: AtomicU64::new(0),
                closing: AtomicBool::new(false),
            }),
        }
    }
}

/// Writer-thread handle; joining flushes the queue.
pub struct StoreWriter {
    inner: Arc<QueueInner>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StoreWriter {
    /// Flush remaining writes and stop the writer thread.
    pub fn shutdown(mut self) -> Result<(), StoreError> {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.available.notify_one();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| StoreError::WriterPanicked),
            None => Ok(()),
        }
    }
}

/// The embedded store. Opened synchronously at startup for recovery
/// reads, then converted into a writer thread plus queue handle.
pub struct StateStore {
    conn: Connection,
}

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS workload_state (
    name                  TEXT PRIMARY KEY,
    status                TEXT NOT NULL,
    run_count             INTEGER NOT NULL DEFAULT 0,
    consecutive_failures  INTEGER NOT NULL DEFAULT 0,
    last_started          TEXT,
    last_stopped          TEXT,
    last_error            TEXT,
    version               TEXT,
    updated_at            TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS run_records (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    workload       TEXT NOT NULL,
    started_at     TEXT NOT NULL,
    finished_at    TEXT NOT NULL,
    exit_code      INTEGER,
    error_message  TEXT,
    duration_ms    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_records_workload
    ON run_records(workload, started_at);
";

impl StateStore {
    /// Open (creating if needed) and migrate the store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Load persisted counters for startup seeding. Status is never
    /// restored as running; supervisors re-derive it.
    pub fn load_states(&self) -> Result<HashMap<String, PersistedWorkload>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, run_count, last_error, version FROM workload_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                PersistedWorkload {
                    run_count: row.get(1)?,
                    last_error: row.get(2)?,
                    version: row.get(3)?,
                },
            ))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (name, persisted) = row?;
            out.insert(name, persisted);
        }
        Ok(out)
    }

    /// Most recent runs for a workload, newest first.
    pub fn recent_runs(&self, workload: &str, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT workload, started_at, finished_at, exit_code, error_message, duration_ms
             FROM run_records WHERE workload = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![workload, limit as i64], |row| {
            Ok(RunRecord {
                workload: row.get(0)?,
                started_at: parse_ts(row.get::<_, String>(1)?),
                finished_at: parse_ts(row.get::<_, String>(2)?),
                exit_code: row.get(3)?,
                error_message: row.get(4)?,
                duration_ms: row.get::<_, i64>(5)?.max(0) as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Convert into the async-friendly writer: a queue handle for
    /// producers and a thread draining it into the connection.
    pub fn into_writer(self, capacity: usize) -> (StoreHandle, StoreWriter) {
        let inner = Arc::new(QueueInner {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        });
        let conn = self.conn;
        let thread_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("mc-statestore".to_string())
            .spawn(move || writer_loop(conn, thread_inner));
        let thread = match thread {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(error = %e, "failed to spawn store writer thread; writes will be dropped");
                None
            }
        };
        (
            StoreHandle { inner: Arc::clone(&inner) },
            StoreWriter { inner, thread },
        )
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

fn writer_loop(conn: Connection, inner: Arc<QueueInner>) {
    let mut failed_writes: u64 = 0;
    loop {
        let batch: Vec<WriteOp> = {
            let mut queue = inner.queue.lock();
            while queue.is_empty() && !inner.closing.load(Ordering::SeqCst) {
                inner.available.wait(&mut queue);
            }
            if queue.is_empty() {
                break;
            }
            queue.drain(..).collect()
        };
        for op in batch {
            if let Err(e) = execute(&conn, &op) {
                failed_writes += 1;
                warn!(error = %e, failed_writes, "state write failed");
            }
        }
        if inner.closing.load(Ordering::SeqCst) && inner.queue.lock().is_empty() {
            break;
        }
    }
    debug!("store writer drained and stopped");
}

fn execute(conn: &Connection, op: &WriteOp) -> Result<(), rusqlite::Error> {
    match op {
        WriteOp::State { name, state, version, at } => {
            conn.execute(
                "INSERT INTO workload_state
                   (name, status, run_count, consecutive_failures,
                    last_started, last_stopped, last_error, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(name) DO UPDATE SET
                   status = excluded.status,
                   run_count = excluded.run_count,
                   consecutive_failures = excluded.consecutive_failures,
                   last_started = excluded.last_started,
                   last_stopped = excluded.last_stopped,
                   last_error = excluded.last_error,
                   version = excluded.version,
                   updated_at = excluded.updated_at",
                params![
                    name,
                    state.status.as_str(),
                    state.run_count,
                    state.consecutive_failures,
                    state.last_started.map(|t| t.to_rfc3339()),
                    state.last_stopped.map(|t| t.to_rfc3339()),
                    state.last_error,
                    version,
                    at.to_rfc3339(),
                ],
            )?;
        }
        WriteOp::Run(record) => {
            conn.execute(
                "INSERT INTO run_records
                   (workload, started_at, finished_at, exit_code, error_message, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.workload,
                    record.started_at.to_rfc3339(),
                    record.finished_at.to_rfc3339(),
                    record.exit_code,
                    record.error_message,
                    record.duration_ms as i64,
                ],
            )?;
        }
        WriteOp::Remove { name } => {
            // Run history is append-only and outlives the spec
            conn.execute("DELETE FROM workload_state WHERE name = ?1", params![name])?;
        }
    }
    Ok(())
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "statestore_tests.rs"]
mod tests;
