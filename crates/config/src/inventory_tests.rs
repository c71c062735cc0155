// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn missing_file_is_empty_inventory() {
    let inv = Inventory::load(Path::new("/nonexistent/inventory.yaml")).unwrap();
    assert!(inv.clients.is_empty());
}

#[test]
fn clients_parse_with_default_port() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.yaml");
    std::fs::write(
        &path,
        concat!(
            "clients:\n",
            "  - name: edge-01\n",
            "    host: 10.0.0.11\n",
            "  - name: edge-02\n",
            "    host: 10.0.0.12\n",
            "    api_port: 9000\n",
        ),
    )
    .unwrap();
    let inv = Inventory::load(&path).unwrap();
    assert_eq!(inv.clients.len(), 2);
    assert_eq!(inv.clients[0].api_port, 8421);
    assert_eq!(inv.clients[1].api_port, 9000);
}

#[test]
fn unknown_fields_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.yaml");
    std::fs::write(&path, "clients:\n  - name: a\n    host: h\n    ssh_user: root\n").unwrap();
    assert!(Inventory::load(&path).is_err());
}
