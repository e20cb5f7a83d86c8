use serde_json::{json, Value};

use super::to_value;
use crate::error::{DaemonError, DaemonResult};
use crate::ipc::command::{PriorityUpdateParams, StatusUpdateParams, TaskIdParams};
use crate::metrics;
use crate::tasks::{NewTask, TaskFilter, TaskStatus};
use crate::AppContext;

pub async fn create(new: NewTask, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx.store.create(new).await?;
    ctx.broadcaster.task_created(&task).await;
    to_value(&task)
}

pub async fn get(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx
        .store
        .get(&params.task_id)
        .await
        .ok_or_else(|| DaemonError::not_found("task", &params.task_id))?;
    to_value(&task)
}

pub async fn list(ctx: &AppContext) -> DaemonResult<Value> {
    let tasks = ctx.store.query(&TaskFilter::default()).await;
    Ok(json!({ "tasks": tasks, "total": tasks.len() }))
}

pub async fn list_filtered(data: Value, ctx: &AppContext) -> DaemonResult<Value> {
    let filter = TaskFilter::from_value(&data);
    let tasks = ctx.store.query(&filter).await;
    Ok(json!({ "tasks": tasks, "total": tasks.len(), "filters": filter }))
}

pub async fn update_status(params: StatusUpdateParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx.store.set_status(&params.task_id, params.status).await?;
    ctx.broadcaster.task_status_changed(&task).await;
    to_value(&task)
}

pub async fn update_priority(
    params: PriorityUpdateParams,
    ctx: &AppContext,
) -> DaemonResult<Value> {
    let task = ctx
        .store
        .set_priority(&params.task_id, params.priority)
        .await?;
    ctx.broadcaster.task_priority_changed(&task).await;
    to_value(&task)
}

pub async fn delete(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx.store.delete(&params.task_id).await?;
    ctx.broadcaster.task_deleted(&task).await;
    Ok(json!({ "deleted": true, "taskId": task.id }))
}

pub async fn status(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx
        .store
        .get(&params.task_id)
        .await
        .ok_or_else(|| DaemonError::not_found("task", &params.task_id))?;
    Ok(json!({
        "taskId": task.id,
        "status": task.status,
        "updatedAt": task.updated_at,
    }))
}

pub async fn cancel(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx
        .store
        .set_status(&params.task_id, TaskStatus::Cancelled)
        .await?;
    ctx.broadcaster.task_status_changed(&task).await;
    to_value(&task)
}

pub async fn retry(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    let task = ctx.store.retry(&params.task_id).await?;
    ctx.broadcaster.task_status_changed(&task).await;
    to_value(&task)
}

pub async fn queue_metrics(ctx: &AppContext) -> DaemonResult<Value> {
    let tasks = ctx.store.snapshot().await;
    to_value(&metrics::queue_snapshot(&tasks, &ctx.config.metrics))
}

pub async fn analyze_impact(params: TaskIdParams, ctx: &AppContext) -> DaemonResult<Value> {
    // The pure analysis tolerates unknown ids; the protocol reports them.
    if ctx.store.get(&params.task_id).await.is_none() {
        return Err(DaemonError::not_found("task", &params.task_id));
    }
    let tasks = ctx.store.snapshot().await;
    to_value(&metrics::impact::impact_analysis(&tasks, &params.task_id))
}

pub async fn validate_dependencies(ctx: &AppContext) -> DaemonResult<Value> {
    let tasks = ctx.store.snapshot().await;
    to_value(&metrics::impact::validate_dependencies(&tasks))
}
