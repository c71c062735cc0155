// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::deploy::Deployer;
use crate::store::FleetStore;
use crate::test_support::{heartbeat, MockDevices, MockSync};

async fn serve(token: Option<&str>) -> (String, Arc<FleetStore>) {
    let store = Arc::new(FleetStore::open_in_memory().unwrap());
    let devices = Arc::new(MockDevices::default());
    let deployer = Deployer::new(Arc::clone(&store), devices.clone(), Arc::new(MockSync::default()));
    let state = AppState {
        store: Arc::clone(&store),
        deployer,
        devices,
        token: token.map(Arc::from),
    };
    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            tcp,
            router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    (format!("http://{addr}"), store)
}

#[tokio::test]
async fn heartbeat_registers_a_client() {
    let (base, store) = serve(None).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{base}/api/heartbeat"))
        .json(&heartbeat("edge-01", Some("1.0.0")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    let overview = store.get_client("edge-01").unwrap().unwrap();
    assert_eq!(overview.status, mc_core::ClientStatus::Online);
    // Fallback host is the heartbeat's source address
    assert_eq!(overview.host, "127.0.0.1");

    let clients: serde_json::Value = client
        .get(format!("{base}/api/fleet/clients"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(clients[0]["name"], "edge-01");
}

#[tokio::test]
async fn fleet_queries_404_on_unknowns() {
    let (base, _store) = serve(None).await;
    let client = reqwest::Client::new();

    for path in [
        "/api/fleet/clients/ghost",
        "/api/fleet/clients/ghost/workloads",
        "/api/fleet/clients/ghost/workloads/w",
        "/api/fleet/deployments/ghost",
    ] {
        let resp = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["detail"].is_string(), "{path}");
    }
}

#[tokio::test]
async fn bearer_token_guards_the_fleet_api() {
    let (base, _store) = serve(Some("sekrit")).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/api/fleet/clients")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/api/fleet/clients"))
        .bearer_auth("sekrit")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn proxied_action_reaches_the_device() {
    let (base, store) = serve(None).await;
    store
        .record_heartbeat(&heartbeat("edge-01", None), Some("127.0.0.1"), chrono::Utc::now())
        .unwrap();

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("{base}/api/fleet/clients/edge-01/workloads/relay/restart"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // MockDevices echoes the proxied call
    assert_eq!(body["message"], "restart relay on 127.0.0.1");
}

#[tokio::test]
async fn unknown_action_is_404() {
    let (base, store) = serve(None).await;
    store
        .record_heartbeat(&heartbeat("edge-01", None), Some("127.0.0.1"), chrono::Utc::now())
        .unwrap();
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/fleet/clients/edge-01/workloads/relay/explode"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn deployment_lifecycle_over_http() {
    let (base, store) = serve(None).await;
    store
        .record_heartbeat(&heartbeat("edge-01", Some("1.0.0")), Some("edge-01"), chrono::Utc::now())
        .unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/fleet/deployments"))
        .json(&serde_json::json!({"version": "2.0.0", "batch_size": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let record: serde_json::Value = resp.json().await.unwrap();
    let id = record["id"].as_str().unwrap().to_string();
    assert_eq!(record["version"], "2.0.0");
    assert_eq!(record["clients"][0]["previous_version"], "1.0.0");

    let listed: serde_json::Value = client
        .get(format!("{base}/api/fleet/deployments?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["id"], id.as_str());

    let fetched: serde_json::Value = client
        .get(format!("{base}/api/fleet/deployments/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["id"], id.as_str());
}

#[tokio::test]
async fn deployment_with_no_targets_is_rejected() {
    let (base, _store) = serve(None).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/fleet/deployments"))
        .json(&serde_json::json!({"version": "2.0.0"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("no target"));
}
