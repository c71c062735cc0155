// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mccd: the Master Control central controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mc_central::api::{self, AppState};
use mc_central::client::HttpFleetClient;
use mc_central::deploy::{Deployer, ScriptSyncRunner, SyncRunner, UnconfiguredSync};
use mc_central::store::FleetStore;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

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

async fn run() -> Result<(), String> {
    let state_dir =
        mc_config::state_dir().ok_or_else(|| "could not determine state directory".to_string())?;
    let daemon_yaml = state_dir.join("daemon.yaml");
    let config = mc_config::DaemonConfig::load(&daemon_yaml).map_err(|e| e.to_string())?;
    let Some(central) = config.central.filter(|c| c.enabled) else {
        return Err(format!(
            "central controller is not enabled in {}",
            daemon_yaml.display()
        ));
    };

    if let Some(parent) = central.db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let store = Arc::new(FleetStore::open(&central.db_path).map_err(|e| e.to_string())?);

    if let Some(inventory_path) = &central.inventory_path {
        let inventory = mc_config::Inventory::load(inventory_path).map_err(|e| e.to_string())?;
        store.seed_inventory(&inventory.clients).map_err(|e| e.to_string())?;
        info!(clients = inventory.clients.len(), "inventory seeded");
    }

    let shutdown = CancellationToken::new();
    {
        let store = Arc::clone(&store);
        let threshold = Duration::from_secs(central.stale_threshold_s.max(1));
        let shutdown = shutdown.clone();
        tokio::spawn(async move { store.run_stale_sweep(threshold, shutdown).await });
    }

    // The fleet-wide device token doubles as the outbound bearer.
    let devices = Arc::new(HttpFleetClient::new(central.api_token.clone()));
    let sync: Arc<dyn SyncRunner> = match &central.deploy_script_path {
        Some(script) => Arc::new(ScriptSyncRunner::new(script.clone())),
        None => Arc::new(UnconfiguredSync),
    };
    let deployer = Deployer::new(Arc::clone(&store), devices.clone(), sync);

    let state = AppState {
        store,
        deployer,
        devices,
        token: central.api_token.clone().map(Arc::from),
    };

    let addr = format!("{}:{}", central.host, central.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("cannot bind {addr}: {e}"))?;
    info!(addr = %addr, "central controller listening");

    let serve_shutdown = shutdown.clone();
    let serve = axum::serve(
        tcp,
        api::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| e.to_string())?;
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received");
            shutdown.cancel();
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            shutdown.cancel();
        }
    }
    Ok(())
}
