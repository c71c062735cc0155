// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    list = { r#"{"command":"list"}"#, Request::List },
    reload = { r#"{"command":"reload-configs"}"#, Request::ReloadConfigs },
    shutdown = { r#"{"command":"shutdown"}"#, Request::Shutdown },
)]
fn bare_commands_parse(json: &str, expected: Request) {
    let req: Request = serde_json::from_str(json).unwrap();
    assert_eq!(req, expected);
}

#[test]
fn named_commands_parse() {
    let req: Request = serde_json::from_str(r#"{"command":"start","name":"tick"}"#).unwrap();
    assert_eq!(req, Request::Start { name: "tick".into() });

    let req: Request = serde_json::from_str(r#"{"command":"status","name":"tick"}"#).unwrap();
    assert_eq!(req, Request::Status { name: "tick".into() });
}

#[test]
fn logs_defaults_to_fifty_lines() {
    let req: Request = serde_json::from_str(r#"{"command":"logs","name":"tick"}"#).unwrap();
    assert_eq!(req, Request::Logs { name: "tick".into(), lines: 50 });

    let req: Request =
        serde_json::from_str(r#"{"command":"logs","name":"tick","lines":200}"#).unwrap();
    assert_eq!(req, Request::Logs { name: "tick".into(), lines: 200 });
}

#[test]
fn unknown_command_is_rejected() {
    assert!(serde_json::from_str::<Request>(r#"{"command":"explode"}"#).is_err());
}

#[test]
fn serialization_uses_kebab_case_tag() {
    let json = serde_json::to_value(Request::ReloadConfigs).unwrap();
    assert_eq!(json["command"], "reload-configs");
}
