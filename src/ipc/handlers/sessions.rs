use serde_json::{json, Value};

use super::to_value;
use crate::error::DaemonResult;
use crate::ipc::command::{SessionIdParams, SubscribeParams};
use crate::tasks::TaskFilter;
use crate::AppContext;

/// Filters arrive either under a `filters` key or as the data object itself.
fn filters_from(data: &Value) -> TaskFilter {
    TaskFilter::from_value(data.get("filters").unwrap_or(data))
}

pub async fn subscribe(params: SubscribeParams, ctx: &AppContext) -> DaemonResult<Value> {
    let subscription = ctx
        .registry
        .subscribe(
            params.session_id,
            params.task_ids,
            params.include_raw_response,
        )
        .await;
    Ok(json!({
        "sessionId": subscription.session_id,
        "taskIds": subscription.task_ids,
        "includeRawResponse": subscription.include_raw_response,
    }))
}

pub async fn unsubscribe(params: SessionIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let removed = ctx.registry.unsubscribe(&params.session_id).await;
    Ok(json!({ "sessionId": params.session_id, "removed": removed }))
}

pub async fn create(data: Value, ctx: &AppContext) -> DaemonResult<Value> {
    let session = ctx.registry.create_session(filters_from(&data)).await;
    Ok(json!({
        "id": session.id,
        "filters": session.filters,
        "createdAt": session.created_at,
        "active": session.active,
    }))
}

pub async fn update(
    params: SessionIdParams,
    data: Value,
    ctx: &AppContext,
) -> DaemonResult<Value> {
    let session = ctx
        .registry
        .update_session(&params.session_id, filters_from(&data))
        .await?;
    to_value(&session)
}

pub async fn get(params: SessionIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let session = ctx.registry.get_session(&params.session_id).await?;
    to_value(&session)
}

pub async fn list(ctx: &AppContext) -> DaemonResult<Value> {
    let sessions = ctx.registry.list_sessions().await;
    Ok(json!({ "sessions": sessions, "total": sessions.len() }))
}

pub async fn close(params: SessionIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let session = ctx.registry.close_session(&params.session_id).await?;
    Ok(json!({ "id": session.id, "active": session.active, "closed": true }))
}
