// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource limits applied in the child's execution context.
//!
//! Both limits run inside `pre_exec`, after fork and before exec. A
//! failure in either aborts the spawn entirely, so a child never runs
//! with partial limits.

use std::io;

use tokio::process::Command;

/// Install the address-space ceiling and niceness delta, if configured.
pub(super) fn apply(cmd: &mut Command, memory_limit_mb: Option<u64>, cpu_nice: Option<i32>) {
    if memory_limit_mb.is_none() && cpu_nice.is_none() {
        return;
    }
    // SAFETY: the closure only calls async-signal-safe libc functions
    // (setrlimit, nice) and touches no heap state from the parent.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(mb) = memory_limit_mb {
                let bytes = mb.saturating_mul(1024 * 1024);
                let rlim = libc::rlimit { rlim_cur: bytes, rlim_max: bytes };
                if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            if let Some(delta) = cpu_nice {
                // nice(2) may legitimately return -1; only errno decides
                clear_errno();
                if libc::nice(delta) == -1 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error().unwrap_or(0) != 0 {
                        return Err(err);
                    }
                }
            }
            Ok(())
        });
    }
}

fn clear_errno() {
    #[cfg(target_os = "linux")]
    // SAFETY: __errno_location returns this thread's errno slot
    unsafe {
        *libc::__errno_location() = 0;
    }
    #[cfg(target_os = "macos")]
    // SAFETY: __error returns this thread's errno slot
    unsafe {
        *libc::__error() = 0;
    }
}
