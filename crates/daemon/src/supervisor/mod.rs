// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-workload supervisor: owns the lifecycle of a single child process.
//!
//! Exactly one child exists per workload at any instant. External
//! commands (start/stop/restart) are serialized by the supervisor's own
//! command lock; the run loop task performs spawns, waits, the
//! termination protocol, and run-mode policy on exit.

mod limits;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use mc_core::{
    Clock, RunMode, RunRecord, WorkloadInfo, WorkloadSpec, WorkloadState, WorkloadStatus,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::statestore::StoreHandle;

/// Default grace period for the polite-then-forced stop protocol.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Grace used when a run overruns its `timeout_s`.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Hard wait after SIGKILL before giving up on the pid.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Liveness poll interval during the grace window.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Restart backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Bytes of stderr retained for `last_error`.
const STDERR_TAIL_BYTES: usize = 4096;

/// Resolves a workload spec to a spawnable child process command.
///
/// The production implementation launches the configured worker binary
/// with the module reference in its environment; tests substitute
/// shell commands.
pub trait WorkloadExecutor: Send + Sync {
    fn command(&self, spec: &WorkloadSpec) -> Command;
}

/// Launches `MC_WORKER_BIN` with `MC_MODULE`, `MC_ENTRY_POINT`, and
/// `MC_PARAMS` (JSON) in the child environment. The worker binary
/// dispatches via its compiled-in handler registry.
pub struct WorkerBinaryExecutor {
    worker_bin: PathBuf,
}

impl WorkerBinaryExecutor {
    pub fn new(worker_bin: PathBuf) -> Self {
        Self { worker_bin }
    }
}

impl WorkloadExecutor for WorkerBinaryExecutor {
    fn command(&self, spec: &WorkloadSpec) -> Command {
        let mut cmd = Command::new(&self.worker_bin);
        cmd.env("MC_MODULE", &spec.module);
        cmd.env("MC_ENTRY_POINT", &spec.entry_point);
        cmd.env(
            "MC_PARAMS",
            serde_json::to_string(&spec.params).unwrap_or_else(|_| "{}".to_string()),
        );
        cmd
    }
}

/// Supervisor command failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("workload '{name}' is {status}, cannot start")]
    NotStartable { name: String, status: WorkloadStatus },

    #[error("workload '{name}' has completed its runs")]
    Completed { name: String },

    #[error("workload '{name}' spawn failed: {message}")]
    Spawn { name: String, message: String },
}

/// Why the scheduler's firing did not start the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// Still running/stopping (or a command is in flight); firing dropped.
    Busy,
    /// Spawn failed; recorded on the workload.
    SpawnFailed,
}

/// Shared handles between a run loop task and external commands.
struct RunShared {
    /// Polite stop request; grace is read after cancellation
    stop: CancellationToken,
    /// Health monitor found the pid gone
    lost: CancellationToken,
    grace: Mutex<Duration>,
}

struct RunTask {
    shared: Arc<RunShared>,
    handle: JoinHandle<()>,
}

/// Dependencies shared by every supervisor on a daemon.
pub struct SupervisorCtx<C: Clock> {
    pub executor: Arc<dyn WorkloadExecutor>,
    pub store: StoreHandle,
    pub logs_dir: PathBuf,
    pub clock: C,
    /// Daemon-wide shutdown; cancels restart sleeps and stops children
    pub shutdown: CancellationToken,
}

impl<C: Clock> Clone for SupervisorCtx<C> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            store: self.store.clone(),
            logs_dir: self.logs_dir.clone(),
            clock: self.clock.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// One supervisor per workload.
pub struct Supervisor<C: Clock> {
    name: String,
    spec: Mutex<WorkloadSpec>,
    state: Mutex<WorkloadState>,
    /// Serializes start/stop/restart; restart holds it across both
    cmd_lock: tokio::sync::Mutex<()>,
    run: Mutex<Option<RunTask>>,
    ctx: SupervisorCtx<C>,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(spec: WorkloadSpec, ctx: SupervisorCtx<C>) -> Self {
        Self {
            name: spec.name.clone(),
            spec: Mutex::new(spec),
            state: Mutex::new(WorkloadState::new()),
            cmd_lock: tokio::sync::Mutex::new(()),
            run: Mutex::new(None),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> WorkloadSpec {
        self.spec.lock().clone()
    }

    /// Replace the spec in place, preserving this supervisor instance.
    pub fn swap_spec(&self, spec: WorkloadSpec) {
        *self.spec.lock() = spec;
    }

    /// Current state snapshot.
    pub fn status(&self) -> WorkloadState {
        self.state.lock().clone()
    }

    pub fn info(&self) -> WorkloadInfo {
        let spec = self.spec.lock();
        let state = self.state.lock();
        WorkloadInfo::from_parts(&spec, &state)
    }

    /// Seed counters persisted by a previous daemon instance.
    /// Status is never restored as running; the run loop re-derives it.
    pub fn seed(&self, run_count: u32, last_error: Option<String>) {
        let mut state = self.state.lock();
        state.run_count = run_count;
        state.last_error = last_error;
        if let Some(max) = self.spec.lock().max_runs {
            if state.run_count >= max {
                state.status = WorkloadStatus::Completed;
            }
        }
    }

    /// Spawn the run loop. Fails if a child already exists or is being
    /// created/destroyed, and reports the first spawn's outcome.
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _guard = self.cmd_lock.lock().await;
        self.start_locked().await
    }

    /// Polite-then-forced stop. Idempotent on an already-stopped workload.
    pub async fn stop(&self, grace: Duration) -> Result<(), SupervisorError> {
        let _guard = self.cmd_lock.lock().await;
        self.stop_locked(grace).await;
        Ok(())
    }

    /// `stop` then `start`, atomic with respect to other commands: the
    /// command lock is held across both, so no observer can slip a
    /// start or stop in between.
    pub async fn restart(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let _guard = self.cmd_lock.lock().await;
        self.stop_locked(DEFAULT_GRACE).await;
        self.start_locked().await
    }

    /// Scheduler entry point: start only if idle. A firing never
    /// preempts an active run or an in-flight command.
    pub async fn try_fire(self: &Arc<Self>) -> FireOutcome {
        let Ok(_guard) = self.cmd_lock.try_lock() else {
            return FireOutcome::Busy;
        };
        if !self.status().status.is_startable() {
            return FireOutcome::Busy;
        }
        match self.start_locked().await {
            Ok(()) => FireOutcome::Started,
            Err(_) => FireOutcome::SpawnFailed,
        }
    }

    /// Health monitor callback: the recorded pid no longer names a
    /// live process. The run loop coerces this to a failed run.
    pub fn notify_process_lost(&self) {
        if let Some(task) = &*self.run.lock() {
            task.shared.lost.cancel();
        }
    }

    async fn start_locked(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let status = self.status().status;
        if status == WorkloadStatus::Completed {
            return Err(SupervisorError::Completed { name: self.name.clone() });
        }
        if !status.is_startable() {
            return Err(SupervisorError::NotStartable { name: self.name.clone(), status });
        }

        // Reap a finished run task from a previous cycle
        if let Some(task) = self.run.lock().take() {
            task.handle.abort();
        }

        let shared = Arc::new(RunShared {
            stop: CancellationToken::new(),
            lost: CancellationToken::new(),
            grace: Mutex::new(DEFAULT_GRACE),
        });
        let (first_tx, first_rx) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(self).run_loop(Arc::clone(&shared), first_tx));
        *self.run.lock() = Some(RunTask { shared, handle });

        match first_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(SupervisorError::Spawn { name: self.name.clone(), message }),
            Err(_) => Err(SupervisorError::Spawn {
                name: self.name.clone(),
                message: "run task exited before reporting".to_string(),
            }),
        }
    }

    async fn stop_locked(&self, grace: Duration) {
        let task = self.run.lock().take();
        if let Some(task) = task {
            *task.shared.grace.lock() = grace;
            task.shared.stop.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(workload = %self.name, error = %e, "run task join failed");
                }
            }
        }
        // The run loop normally settles status itself; cover the case
        // where no task existed but the status was left active.
        let mut state = self.state.lock();
        if state.status.is_active() {
            state.status = WorkloadStatus::Stopped;
            state.pid = None;
            state.last_stopped = Some(self.ctx.clock.now_utc());
        }
        drop(state);
        self.persist_state();
    }

    // ---- run loop -------------------------------------------------

    async fn run_loop(
        self: Arc<Self>,
        shared: Arc<RunShared>,
        first_spawn: oneshot::Sender<Result<(), String>>,
    ) {
        let mut first = Some(first_spawn);
        loop {
            let spec = self.spec();
            self.transition(WorkloadStatus::Starting, None);

            let (child, stderr_tail, drain) = match self.spawn_child(&spec).await {
                Ok(parts) => parts,
                Err(message) => {
                    let now = self.ctx.clock.now_utc();
                    self.transition(WorkloadStatus::Failed, Some(message.clone()));
                    self.ctx.store.push_run(RunRecord::new(
                        &self.name,
                        now,
                        now,
                        None,
                        Some(message.clone()),
                    ));
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(message));
                    }
                    return;
                }
            };

            let started_at = self.ctx.clock.now_utc();
            {
                let mut state = self.state.lock();
                state.status = WorkloadStatus::Running;
                state.pid = child.id();
                state.last_started = Some(started_at);
            }
            self.persist_state();
            info!(workload = %self.name, pid = ?child.id(), "workload started");
            if let Some(tx) = first.take() {
                let _ = tx.send(Ok(()));
            }

            let outcome = self.supervise_child(child, &spec, &shared).await;
            // Let the stderr drain finish so last_error sees the tail
            if let Some(drain) = drain {
                let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;
            }
            let decision = self.settle_run(&spec, started_at, outcome, &stderr_tail);

            match decision {
                Decision::Exit => return,
                Decision::Restart(delay) => {
                    debug!(workload = %self.name, delay_s = delay.as_secs_f64(), "restart pending");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shared.stop.cancelled() => {
                            self.transition(WorkloadStatus::Stopped, None);
                            return;
                        }
                        _ = self.ctx.shutdown.cancelled() => {
                            self.transition(WorkloadStatus::Stopped, None);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn spawn_child(
        &self,
        spec: &WorkloadSpec,
    ) -> Result<(Child, Arc<Mutex<Vec<u8>>>, Option<JoinHandle<()>>), String> {
        let log_path = self.log_path();
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("cannot open log file {}: {e}", log_path.display()))?;

        let mut cmd = self.ctx.executor.command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        limits::apply(&mut cmd, spec.memory_limit_mb, spec.cpu_nice);

        let mut child = cmd.spawn().map_err(|e| format!("spawn failed: {e}"))?;

        // Mirror stderr into the log file and keep a bounded tail for
        // last_error.
        let tail = Arc::new(Mutex::new(Vec::new()));
        let drain = child.stderr.take().map(|stderr| {
            tokio::spawn(drain_stderr(stderr, log_path.clone(), Arc::clone(&tail)))
        });

        Ok((child, tail, drain))
    }

    /// Wait for the child to exit, for a stop request, for a liveness
    /// miss, or for the run to overrun its timeout.
    async fn supervise_child(
        &self,
        mut child: Child,
        spec: &WorkloadSpec,
        shared: &RunShared,
    ) -> ExitOutcome {
        let event = {
            let timeout = async {
                match spec.timeout_s {
                    Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                res = child.wait() => WaitEvent::Exited(res.ok().and_then(|s| s.code())),
                _ = shared.stop.cancelled() => WaitEvent::StopRequested,
                _ = self.ctx.shutdown.cancelled() => WaitEvent::StopRequested,
                _ = shared.lost.cancelled() => WaitEvent::Lost,
                _ = timeout => WaitEvent::TimedOut,
            }
        };
        match event {
            WaitEvent::Exited(code) => ExitOutcome::Exited(code),
            WaitEvent::StopRequested => {
                let grace = *shared.grace.lock();
                let code = self.terminate(&mut child, grace).await;
                ExitOutcome::Stopped(code)
            }
            WaitEvent::Lost => ExitOutcome::Lost,
            WaitEvent::TimedOut => {
                warn!(workload = %self.name, timeout_s = ?spec.timeout_s, "run exceeded timeout");
                let code = self.terminate(&mut child, TIMEOUT_GRACE).await;
                ExitOutcome::TimedOut(code)
            }
        }
    }

    /// Termination protocol: SIGTERM, poll up to `grace` at 100 ms,
    /// SIGKILL, wait up to 2 s. Always clears the pid.
    async fn terminate(&self, child: &mut Child, grace: Duration) -> Option<i32> {
        {
            let mut state = self.state.lock();
            state.status = WorkloadStatus::Stopping;
        }
        self.persist_state();

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let mut waited = Duration::ZERO;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.code(),
                Ok(None) => {}
                Err(_) => break,
            }
            if waited >= grace {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
            waited += STOP_POLL;
        }

        if let Some(pid) = child.id() {
            warn!(workload = %self.name, pid, "grace expired, sending SIGKILL");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        match tokio::time::timeout(KILL_WAIT, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    }

    /// Record the finished run and evaluate the run-mode policy.
    fn settle_run(
        &self,
        spec: &WorkloadSpec,
        started_at: chrono::DateTime<chrono::Utc>,
        outcome: ExitOutcome,
        stderr_tail: &Mutex<Vec<u8>>,
    ) -> Decision {
        let finished_at = self.ctx.clock.now_utc();
        let run_duration = (finished_at - started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let (exit_code, error, stop_requested) = match outcome {
            ExitOutcome::Exited(Some(0)) => (Some(0), None, false),
            ExitOutcome::Exited(code) => {
                let tail = read_tail(stderr_tail);
                let error = tail.unwrap_or_else(|| match code {
                    Some(c) => format!("exited with code {c}"),
                    None => "killed by signal".to_string(),
                });
                (code, Some(error), false)
            }
            ExitOutcome::Stopped(code) => (code, None, true),
            ExitOutcome::TimedOut(code) => (code, Some("timeout".to_string()), false),
            ExitOutcome::Lost => (None, Some("process disappeared".to_string()), false),
        };
        let clean = exit_code == Some(0) && error.is_none();

        let run_count = {
            let mut state = self.state.lock();
            state.pid = None;
            state.last_stopped = Some(finished_at);
            state.run_count = state.run_count.saturating_add(1);
            if clean || stop_requested {
                state.consecutive_failures = 0;
            } else {
                // A run that outlived its restart delay starts the
                // backoff ladder over.
                if run_duration.as_secs_f64() > spec.restart_delay_s {
                    state.consecutive_failures = 0;
                }
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
            if !clean && !stop_requested {
                state.last_error = error.clone();
            }
            state.run_count
        };

        self.ctx.store.push_run(RunRecord::new(
            &self.name,
            started_at,
            finished_at,
            exit_code,
            error.clone(),
        ));

        if stop_requested {
            self.transition(WorkloadStatus::Stopped, None);
            return Decision::Exit;
        }

        if !clean {
            info!(workload = %self.name, exit_code = ?exit_code, error = ?error, "run failed");
        }

        match spec.run_mode {
            RunMode::Schedule => {
                // Next firing comes from the scheduler, never from here
                let status =
                    if clean { WorkloadStatus::Stopped } else { WorkloadStatus::Failed };
                self.transition(status, None);
                Decision::Exit
            }
            RunMode::NTimes => {
                let max = spec.max_runs.unwrap_or(u32::MAX);
                if run_count >= max {
                    let status =
                        if clean { WorkloadStatus::Completed } else { WorkloadStatus::Failed };
                    self.transition(status, None);
                    Decision::Exit
                } else {
                    self.pre_restart(clean);
                    Decision::Restart(self.restart_delay(spec, clean))
                }
            }
            RunMode::Forever => {
                self.pre_restart(clean);
                Decision::Restart(self.restart_delay(spec, clean))
            }
        }
    }

    fn pre_restart(&self, clean: bool) {
        let status = if clean { WorkloadStatus::Stopped } else { WorkloadStatus::Failed };
        self.transition(status, None);
    }

    fn restart_delay(&self, spec: &WorkloadSpec, clean: bool) -> Duration {
        if clean {
            return Duration::from_secs_f64(spec.restart_delay_s.max(0.0));
        }
        let failures = self.state.lock().consecutive_failures.max(1);
        effective_delay(spec.restart_delay_s, failures)
    }

    fn transition(&self, status: WorkloadStatus, error: Option<String>) {
        {
            let mut state = self.state.lock();
            state.status = status;
            if status != WorkloadStatus::Running && status != WorkloadStatus::Stopping {
                state.pid = None;
            }
            if let Some(error) = error {
                state.last_error = Some(error);
            }
        }
        self.persist_state();
    }

    fn persist_state(&self) {
        let state = self.state.lock().clone();
        let version = self.spec.lock().version.clone();
        self.ctx.store.push_state(&self.name, state, version);
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.logs_dir.join(format!("{}.log", self.name))
    }
}

enum WaitEvent {
    Exited(Option<i32>),
    StopRequested,
    Lost,
    TimedOut,
}

/// How a supervised run ended.
#[derive(Debug)]
enum ExitOutcome {
    /// The child exited on its own with this code (None: signal)
    Exited(Option<i32>),
    /// Stop requested (external command or daemon shutdown)
    Stopped(Option<i32>),
    /// Overran timeout_s and was terminated
    TimedOut(Option<i32>),
    /// Liveness probe found the pid gone
    Lost,
}

enum Decision {
    Restart(Duration),
    Exit,
}

/// Effective backoff delay before the next spawn:
/// `min(restart_delay_s * 2^(consecutive_failures - 1), 300s)`.
pub(crate) fn effective_delay(base_s: f64, consecutive_failures: u32) -> Duration {
    let base = Duration::from_secs_f64(base_s.max(0.0));
    let factor = 2u64.saturating_pow(consecutive_failures.saturating_sub(1).min(32));
    let scaled = base.saturating_mul(factor.min(u32::MAX as u64) as u32);
    scaled.min(MAX_BACKOFF)
}

fn read_tail(tail: &Mutex<Vec<u8>>) -> Option<String> {
    let buf = tail.lock();
    if buf.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&buf).trim_end().to_string())
}

/// Copy child stderr into the workload log file, retaining the final
/// 4 KiB in memory for `last_error`.
async fn drain_stderr(
    mut stderr: tokio::process::ChildStderr,
    log_path: PathBuf,
    tail: Arc<Mutex<Vec<u8>>>,
) {
    use tokio::io::AsyncWriteExt;

    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
        .ok();

    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Some(log) = log.as_mut() {
                    let _ = log.write_all(&buf[..n]).await;
                }
                let mut tail = tail.lock();
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    if let Some(log) = log.as_mut() {
        let _ = log.flush().await;
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
