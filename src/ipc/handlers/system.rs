use serde_json::{json, Value};

use crate::error::{DaemonError, DaemonResult};
use crate::AppContext;

pub async fn ping(ctx: &AppContext) -> DaemonResult<Value> {
    Ok(json!({
        "pong": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": ctx.started_at.elapsed().as_secs(),
    }))
}

pub async fn websocket_status(ctx: &AppContext) -> DaemonResult<Value> {
    let mut status = ctx.broadcaster.status().await;
    if let Some(obj) = status.as_object_mut() {
        obj.insert(
            "metricsIntervalSecs".to_string(),
            json!(ctx.config.metrics.interval_secs),
        );
        obj.insert(
            "subscriptions".to_string(),
            json!(ctx.registry.subscription_count().await),
        );
        obj.insert(
            "monitoringSessions".to_string(),
            json!(ctx.registry.session_count().await),
        );
    }
    Ok(status)
}

/// Best-effort restart request. When no supervisor channel is attached the
/// command fails with a structured error; the gateway loop keeps running
/// either way.
pub async fn restart(ctx: &AppContext) -> DaemonResult<Value> {
    match &ctx.restart_tx {
        Some(tx) if tx.send(()).is_ok() => Ok(json!({ "restartRequested": true })),
        _ => Err(DaemonError::Connection(
            "no restart supervisor attached".to_string(),
        )),
    }
}
