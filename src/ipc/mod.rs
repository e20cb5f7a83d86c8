//! Control protocol gateway: newline-delimited JSON envelopes over a
//! persistent TCP connection.
//!
//! Requests on one connection are read, dispatched, and answered strictly in
//! receipt order — the read loop does not pick up the next line until the
//! current response is on the wire. No ordering holds across connections.

pub mod command;
pub mod handlers;

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::DaemonError;
use crate::ipc::command::{Command, Envelope};
use crate::AppContext;

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = ctx.config.control_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "control protocol gateway listening");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping gateway");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new control connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "control connection error");
                    }
                });
            }
        }
    }

    info!("gateway stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(err = %e, "could not register SIGTERM — Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

// ─── Per-connection loop ─────────────────────────────────────────────────────

/// What the read loop should do after writing a response.
enum Disposition {
    Continue,
    /// Per-request deadline hit: answer, then forcibly drop the connection.
    /// The store effect of the timed-out request is not rolled back.
    Abort,
    Subscribed(String),
    Unsubscribed(String),
}

/// Notification subscriptions created over a connection are owned by it and
/// die with it — including when the transport fails mid-conversation, so the
/// teardown below runs whether `serve_requests` returned cleanly or with an
/// I/O error. Monitoring sessions outlive the connection.
async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    let mut owned_subscriptions: Vec<String> = Vec::new();
    let result = serve_requests(stream, &ctx, &mut owned_subscriptions).await;

    for id in owned_subscriptions {
        ctx.registry.unsubscribe(&id).await;
        debug!(session = %id, "dropped connection-owned subscription");
    }
    result
}

async fn serve_requests(
    stream: tokio::net::TcpStream,
    ctx: &AppContext,
    owned_subscriptions: &mut Vec<String>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (response, disposition) = dispatch_line(&line, ctx).await;
        writer.write_all(response.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;

        match disposition {
            Disposition::Continue => {}
            Disposition::Subscribed(id) => owned_subscriptions.push(id),
            Disposition::Unsubscribed(id) => owned_subscriptions.retain(|s| *s != id),
            Disposition::Abort => break,
        }
    }
    Ok(())
}

/// Decode, dispatch, and encode one request. Every failure mode maps to a
/// `success:false` frame; nothing here can take the gateway down.
async fn dispatch_line(line: &str, ctx: &AppContext) -> (Value, Disposition) {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            return (
                DaemonError::validation(format!("malformed request envelope: {e}")).to_response(),
                Disposition::Continue,
            );
        }
    };

    let cmd = match Command::from_envelope(&envelope) {
        Ok(Command::Unknown(name)) => {
            return (
                DaemonError::validation(format!("unknown command '{name}'")).to_response(),
                Disposition::Continue,
            );
        }
        Ok(cmd) => cmd,
        Err(e) => return (e.to_response(), Disposition::Continue),
    };

    debug!(command = %envelope.command, "dispatch");
    let is_subscribe = matches!(cmd, Command::SubscribeToTaskNotifications(_));
    let is_unsubscribe = matches!(cmd, Command::UnsubscribeFromTaskNotifications(_));

    let deadline = Duration::from_secs(ctx.config.request_timeout_secs);
    match tokio::time::timeout(deadline, dispatch(cmd, ctx)).await {
        Err(_) => (
            DaemonError::Timeout(ctx.config.request_timeout_secs).to_response(),
            Disposition::Abort,
        ),
        Ok(Err(e)) => (e.to_response(), Disposition::Continue),
        Ok(Ok(data)) => {
            let session_id = data
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let disposition = match session_id {
                Some(id) if is_subscribe => Disposition::Subscribed(id),
                Some(id) if is_unsubscribe => Disposition::Unsubscribed(id),
                _ => Disposition::Continue,
            };
            (json!({ "success": true, "data": data }), disposition)
        }
    }
}

async fn dispatch(cmd: Command, ctx: &AppContext) -> crate::error::DaemonResult<Value> {
    match cmd {
        Command::CreateTask(new) => handlers::tasks::create(new, ctx).await,
        Command::GetTask(p) => handlers::tasks::get(p, ctx).await,
        Command::ListTasks => handlers::tasks::list(ctx).await,
        Command::ListTasksFiltered(data) => handlers::tasks::list_filtered(data, ctx).await,
        Command::UpdateTaskStatus(p) => handlers::tasks::update_status(p, ctx).await,
        Command::UpdateTaskPriority(p) => handlers::tasks::update_priority(p, ctx).await,
        Command::DeleteTask(p) => handlers::tasks::delete(p, ctx).await,
        Command::GetTaskStatus(p) => handlers::tasks::status(p, ctx).await,
        Command::CancelTask(p) => handlers::tasks::cancel(p, ctx).await,
        Command::RetryTask(p) => handlers::tasks::retry(p, ctx).await,
        Command::GetQueueMetrics => handlers::tasks::queue_metrics(ctx).await,
        Command::AnalyzeTaskImpact(p) => handlers::tasks::analyze_impact(p, ctx).await,
        Command::ValidateTaskDependencies => handlers::tasks::validate_dependencies(ctx).await,
        Command::SubscribeToTaskNotifications(p) => handlers::sessions::subscribe(p, ctx).await,
        Command::UnsubscribeFromTaskNotifications(p) => {
            handlers::sessions::unsubscribe(p, ctx).await
        }
        Command::CreateMonitoringSession(data) => handlers::sessions::create(data, ctx).await,
        Command::UpdateMonitoringSession(p, data) => {
            handlers::sessions::update(p, data, ctx).await
        }
        Command::GetMonitoringSession(p) => handlers::sessions::get(p, ctx).await,
        Command::ListMonitoringSessions => handlers::sessions::list(ctx).await,
        Command::CloseMonitoringSession(p) => handlers::sessions::close(p, ctx).await,
        Command::GetWebSocketStatus => handlers::system::websocket_status(ctx).await,
        Command::RestartSystem => handlers::system::restart(ctx).await,
        Command::Ping => handlers::system::ping(ctx).await,
        // from_envelope already intercepted Unknown.
        Command::Unknown(name) => Err(DaemonError::validation(format!(
            "unknown command '{name}'"
        ))),
    }
}
