// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem locations shared by the daemon and the controller.

use std::path::PathBuf;

/// Resolve the state directory:
/// `MC_STATE_DIR` > `$XDG_STATE_HOME/mastctl` > `~/.local/state/mastctl`.
///
/// None when no home directory can be determined.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("MC_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
        .map(|base| base.join("mastctl"))
}
