// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local control server: one-shot JSON requests over the Unix socket.
//!
//! Each connection carries exactly one request and one response.
//! Access control is the filesystem permission on the socket's parent
//! directory.

use std::sync::Arc;

use mc_core::Clock;
use mc_wire::{read_request, write_response, ProtocolError, Request, Response, ResponseBody};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::env::ipc_timeout;
use crate::orchestrator::{CommandError, Orchestrator};

/// Shared context for request handlers.
pub struct ListenCtx<C: Clock> {
    pub orchestrator: Arc<Orchestrator<C>>,
    /// Signalled by the `shutdown` command; main drives the actual stop
    pub shutdown_requested: Arc<Notify>,
}

/// Accept loop for the local control socket.
pub struct Listener<C: Clock> {
    unix: UnixListener,
    ctx: Arc<ListenCtx<C>>,
}

impl<C: Clock> Listener<C> {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<C>>) -> Self {
        Self { unix, ctx }
    }

    /// Run until the task is dropped, spawning one task per connection.
    pub async fn run(self) {
        info!("local control server listening");
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = stream.into_split();
                        let result = async {
                            let request = read_request(&mut reader, ipc_timeout()).await?;
                            debug!(request = ?request, "received local request");
                            let response = handle_request(&request, &ctx).await;
                            write_response(&mut writer, &response, ipc_timeout()).await
                        }
                        .await;
                        if let Err(e) = result {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("accept error: {}", e),
            }
        }
    }
}

fn log_connection_error(e: ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => warn!("connection timeout"),
        _ => error!("connection error: {}", e),
    }
}

async fn handle_request<C: Clock>(request: &Request, ctx: &ListenCtx<C>) -> Response {
    match request {
        Request::List => Response::Ok {
            body: Some(ResponseBody::Workloads { workloads: ctx.orchestrator.list() }),
        },

        Request::Status { name } => match ctx.orchestrator.info(name) {
            Some(info) => Response::Ok {
                body: Some(ResponseBody::Workload { workload: Box::new(info) }),
            },
            None => Response::error(format!("no such workload: {name}")),
        },

        Request::Start { name } => command_reply(
            ctx.orchestrator.start_workload(name).await,
            format!("started {name}"),
        ),

        Request::Stop { name } => command_reply(
            ctx.orchestrator.stop_workload(name).await,
            format!("stopped {name}"),
        ),

        Request::Restart { name } => command_reply(
            ctx.orchestrator.restart_workload(name).await,
            format!("restarted {name}"),
        ),

        Request::Logs { name, lines } => match ctx.orchestrator.logs(name, *lines).await {
            Ok(lines) => Response::Ok {
                body: Some(ResponseBody::Logs { name: name.clone(), lines }),
            },
            Err(e) => Response::error(e.to_string()),
        },

        Request::ReloadConfigs => match ctx.orchestrator.reload().await {
            Ok(changes) => Response::Ok { body: Some(ResponseBody::Reload { changes }) },
            Err(e) => Response::error(e.to_string()),
        },

        Request::Shutdown => {
            ctx.shutdown_requested.notify_one();
            Response::ack("shutting down")
        }
    }
}

fn command_reply(result: Result<(), CommandError>, ok_message: String) -> Response {
    match result {
        Ok(()) => Response::ack(ok_message),
        Err(e) => Response::error(e.to_string()),
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
