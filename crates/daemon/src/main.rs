// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mcd: the Master Control device daemon.

use std::sync::Arc;

use mc_core::SystemClock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mc_daemon::api::{self, ApiState};
use mc_daemon::health::HealthMonitor;
use mc_daemon::heartbeat::HeartbeatReporter;
use mc_daemon::lifecycle::{self, Config};
use mc_daemon::listener::{ListenCtx, Listener};
use mc_daemon::orchestrator::Orchestrator;
use mc_daemon::supervisor::{SupervisorCtx, WorkerBinaryExecutor};

fn main() {
    let _log_guard = init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

/// Log to stderr, or to a daily-rolled file when MC_LOG_DIR is set.
/// The returned guard must live for the process lifetime.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    match std::env::var("MC_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mcd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn run() -> Result<(), lifecycle::LifecycleError> {
    let config = Config::load()?;
    let startup = lifecycle::startup(config)?;
    let config = startup.config.clone();

    let shutdown = CancellationToken::new();
    let ctx = SupervisorCtx {
        executor: Arc::new(WorkerBinaryExecutor::new(mc_daemon::env::worker_bin())),
        store: startup.store_handle.clone(),
        logs_dir: config.logs_dir.clone(),
        clock: SystemClock,
        shutdown: shutdown.clone(),
    };
    let orchestrator = Orchestrator::new(config.config_dir.clone(), ctx, Some(startup.store_writer));

    // Boot config errors leave the daemon running with an empty
    // registry; the operator fixes the files and reloads.
    match mc_config::load_spec_dir(&config.config_dir) {
        Ok(specs) => orchestrator.boot(specs, startup.seeds).await,
        Err(e) => {
            error!(error = %e, "boot config load failed; starting with no workloads");
            orchestrator.boot(Vec::new(), startup.seeds).await;
        }
    }

    // Local control server
    let shutdown_requested = Arc::new(Notify::new());
    let listen_ctx = Arc::new(ListenCtx {
        orchestrator: Arc::clone(&orchestrator),
        shutdown_requested: Arc::clone(&shutdown_requested),
    });
    tokio::spawn(Listener::new(startup.listener, listen_ctx).run());

    // Scheduler and health monitor
    let scheduler = orchestrator.scheduler();
    tokio::spawn(async move { scheduler.run().await });
    let health = Arc::new(HealthMonitor::new(
        orchestrator.registry(),
        SystemClock,
        shutdown.clone(),
    ));
    let metrics_cache = health.metrics_cache();
    {
        let health = Arc::clone(&health);
        tokio::spawn(async move { health.run().await });
    }

    // Fleet surfaces, when this device is enrolled
    if let Some(fleet) = startup.daemon_config.fleet.clone().filter(|f| f.enabled) {
        let api_state = ApiState {
            orchestrator: Arc::clone(&orchestrator),
            token: fleet.api_token.clone().map(Arc::from),
        };
        let addr = format!("{}:{}", fleet.api_host, fleet.api_port);
        let api_shutdown = shutdown.clone();
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(tcp) => {
                info!(addr = %addr, "remote control server listening");
                tokio::spawn(async move {
                    let serve = axum::serve(tcp, api::router(api_state))
                        .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
                    if let Err(e) = serve.await {
                        error!(error = %e, "remote control server failed");
                    }
                });
            }
            Err(e) => warn!(addr = %addr, error = %e, "cannot bind remote control server"),
        }

        let reporter = HeartbeatReporter::new(
            orchestrator.registry(),
            metrics_cache,
            fleet,
            config.version_path.clone(),
            SystemClock,
            shutdown.clone(),
        );
        tokio::spawn(async move { reporter.run().await });
    }

    info!("mcd ready");
    wait_for_exit(&shutdown_requested).await;

    orchestrator.shutdown().await;
    lifecycle::cleanup(&config);
    Ok(())
}

async fn wait_for_exit(shutdown_requested: &Notify) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            shutdown_requested.notified().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown_requested.notified() => info!("shutdown requested over control socket"),
    }
}
