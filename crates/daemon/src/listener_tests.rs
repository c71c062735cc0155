// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{shell_spec, system_ctx};
use mc_core::RunMode;
use mc_wire::{read_response, write_request};
use std::collections::HashMap;
use std::time::Duration;

async fn serve(dir: &std::path::Path, specs: Vec<mc_core::WorkloadSpec>) -> (std::path::PathBuf, Arc<Notify>) {
    std::fs::create_dir_all(dir.join("logs")).unwrap();
    let orchestrator = crate::orchestrator::Orchestrator::new(
        dir.join("configs"),
        system_ctx(&dir.join("logs")),
        None,
    );
    orchestrator.boot(specs, HashMap::new()).await;

    let socket_path = dir.join("daemon.sock");
    let unix = UnixListener::bind(&socket_path).unwrap();
    let shutdown_requested = Arc::new(Notify::new());
    let ctx = Arc::new(ListenCtx {
        orchestrator,
        shutdown_requested: Arc::clone(&shutdown_requested),
    });
    tokio::spawn(Listener::new(unix, ctx).run());
    (socket_path, shutdown_requested)
}

async fn roundtrip(socket: &std::path::Path, request: Request) -> Response {
    let stream = tokio::net::UnixStream::connect(socket).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    write_request(&mut writer, &request, Duration::from_secs(2)).await.unwrap();
    read_response(&mut reader, Duration::from_secs(2)).await.unwrap()
}

#[tokio::test]
async fn list_returns_all_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, _) = serve(
        dir.path(),
        vec![
            shell_spec("a", "exit 0", RunMode::NTimes),
            shell_spec("b", "exit 0", RunMode::NTimes),
        ],
    )
    .await;

    match roundtrip(&socket, Request::List).await {
        Response::Ok { body: Some(ResponseBody::Workloads { workloads }) } => {
            let names: Vec<_> = workloads.iter().map(|w| w.name.as_str()).collect();
            assert_eq!(names, ["a", "b"]);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn status_of_missing_workload_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, _) = serve(dir.path(), Vec::new()).await;

    match roundtrip(&socket, Request::Status { name: "ghost".into() }).await {
        Response::Error { message } => assert!(message.contains("ghost")),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn start_and_stop_ack() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, _) = serve(dir.path(), vec![shell_spec("svc", "sleep 30", RunMode::Forever)]).await;

    // Forever services auto-start at boot; stop first
    match roundtrip(&socket, Request::Stop { name: "svc".into() }).await {
        Response::Ok { body: Some(ResponseBody::Ack { message }) } => {
            assert_eq!(message, "stopped svc");
        }
        other => panic!("unexpected response: {other:?}"),
    }
    match roundtrip(&socket, Request::Start { name: "svc".into() }).await {
        Response::Ok { body: Some(ResponseBody::Ack { message }) } => {
            assert_eq!(message, "started svc");
        }
        other => panic!("unexpected response: {other:?}"),
    }
    roundtrip(&socket, Request::Stop { name: "svc".into() }).await;
}

#[tokio::test]
async fn each_connection_serves_one_request() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, _) = serve(dir.path(), Vec::new()).await;

    let stream = tokio::net::UnixStream::connect(&socket).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    write_request(&mut writer, &Request::List, Duration::from_secs(2)).await.unwrap();
    read_response(&mut reader, Duration::from_secs(2)).await.unwrap();

    // The daemon side closes after one round trip
    let second = write_request(&mut writer, &Request::List, Duration::from_secs(2)).await;
    let followup = read_response(&mut reader, Duration::from_secs(2)).await;
    assert!(second.is_err() || followup.is_err());
}

#[tokio::test]
async fn shutdown_command_signals_main() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, shutdown_requested) = serve(dir.path(), Vec::new()).await;

    let notified = shutdown_requested.notified();
    match roundtrip(&socket, Request::Shutdown).await {
        Response::Ok { body: Some(ResponseBody::Ack { message }) } => {
            assert_eq!(message, "shutting down");
        }
        other => panic!("unexpected response: {other:?}"),
    }
    tokio::time::timeout(Duration::from_secs(1), notified).await.unwrap();
}
