use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::error::{DaemonError, DaemonResult};
use crate::ids;

// ─── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
    Failed,
}

impl TaskStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted by createTask. Everything except the title is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub dependencies: Option<HashSet<String>>,
}

// ─── Filter ──────────────────────────────────────────────────────────────────

/// Query predicate for listTasksFiltered and monitoring sessions.
///
/// `status`/`priority` hold "any of" sets; `limit == None` means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<TaskStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Vec<TaskPriority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl TaskFilter {
    /// Lenient wire parsing: status/priority accept a scalar or a list;
    /// limit/offset that are absent or non-numeric fall back to
    /// unbounded / 0 instead of failing the request.
    pub fn from_value(data: &Value) -> Self {
        Self {
            status: parse_one_or_many(data.get("status")),
            priority: parse_one_or_many(data.get("priority")),
            search: data
                .get("search")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            limit: data.get("limit").and_then(Value::as_u64).map(|n| n as usize),
            offset: data
                .get("offset")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(0),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(priorities) = &self.priority {
            if !priorities.contains(&task.priority) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !task.title.to_lowercase().contains(&needle)
                && !task.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

fn parse_one_or_many<T: serde::de::DeserializeOwned>(v: Option<&Value>) -> Option<Vec<T>> {
    let v = v?;
    match v {
        Value::Array(items) => {
            let parsed: Vec<T> = items
                .iter()
                .filter_map(|i| serde_json::from_value(i.clone()).ok())
                .collect();
            (!parsed.is_empty()).then_some(parsed)
        }
        single => serde_json::from_value::<T>(single.clone()).ok().map(|t| vec![t]),
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// In-memory task store.
///
/// Every mutation targets one named field (plus `updated_at`) against the
/// single owning record under the write lock, so concurrent status and
/// priority updates to the same task both survive.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

/// Exclusive hold on the whole store; see [`TaskStore::hold`].
pub struct StoreHold<'a>(#[allow(dead_code)] RwLockWriteGuard<'a, HashMap<String, Task>>);

/// Advance `updated_at` strictly past its current value even when the clock
/// has not ticked since the last write.
fn bump_updated(task: &mut Task) {
    let now = Utc::now();
    task.updated_at = if now > task.updated_at {
        now
    } else {
        task.updated_at + Duration::milliseconds(1)
    };
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, new: NewTask) -> DaemonResult<Task> {
        if new.title.trim().is_empty() {
            return Err(DaemonError::validation("title must not be empty"));
        }
        let now = Utc::now();
        let task = Task {
            id: ids::generate("task"),
            title: new.title,
            description: new.description,
            status: TaskStatus::Todo,
            priority: new.priority.unwrap_or(TaskPriority::Medium),
            created_by: new.created_by.unwrap_or_default(),
            assigned_to: new.assigned_to,
            dependencies: new.dependencies.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Take the store's write lock and keep it until the returned guard
    /// drops; every task operation stalls for the duration. Used to stage a
    /// quiescent window, e.g. when exercising request deadlines.
    pub async fn hold(&self) -> StoreHold<'_> {
        StoreHold(self.tasks.write().await)
    }

    /// Point-in-time copy of every task, for the metrics aggregator.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Filtered query, oldest first, with offset/limit applied after the
    /// predicate.
    pub async fn query(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut matched: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub async fn set_status(&self, id: &str, status: TaskStatus) -> DaemonResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DaemonError::not_found("task", id))?;
        task.status = status;
        bump_updated(task);
        Ok(task.clone())
    }

    pub async fn set_priority(&self, id: &str, priority: TaskPriority) -> DaemonResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DaemonError::not_found("task", id))?;
        task.priority = priority;
        bump_updated(task);
        Ok(task.clone())
    }

    /// Move a failed or cancelled task back to todo.
    pub async fn retry(&self, id: &str) -> DaemonResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DaemonError::not_found("task", id))?;
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(DaemonError::validation(format!(
                "task '{id}' is {} — only failed or cancelled tasks can be retried",
                task.status.as_str()
            )));
        }
        task.status = TaskStatus::Todo;
        bump_updated(task);
        Ok(task.clone())
    }

    pub async fn delete(&self, id: &str) -> DaemonResult<Task> {
        self.tasks
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DaemonError::not_found("task", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn create_starts_in_todo_with_equal_timestamps() {
        let store = TaskStore::new();
        let task = store.create(new_task("T1")).await.unwrap();
        assert!(task.id.starts_with("task_"));
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let store = TaskStore::new();
        assert!(matches!(
            store.create(new_task("   ")).await,
            Err(DaemonError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn status_update_is_visible_and_strictly_later() {
        let store = TaskStore::new();
        let task = store.create(new_task("T1")).await.unwrap();
        let updated = store.set_status(&task.id, TaskStatus::Done).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert!(updated.updated_at > task.created_at);

        let fetched = store.get(&task.id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn update_of_missing_task_is_not_found() {
        let store = TaskStore::new();
        assert!(matches!(
            store.set_status("missing", TaskStatus::Done).await,
            Err(DaemonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_status_and_priority_updates_both_survive() {
        let store = std::sync::Arc::new(TaskStore::new());
        let task = store.create(new_task("T1")).await.unwrap();

        let s = store.clone();
        let id = task.id.clone();
        let status_write =
            tokio::spawn(async move { s.set_status(&id, TaskStatus::InProgress).await });
        let s = store.clone();
        let id = task.id.clone();
        let priority_write =
            tokio::spawn(async move { s.set_priority(&id, TaskPriority::High).await });
        status_write.await.unwrap().unwrap();
        priority_write.await.unwrap().unwrap();

        let final_task = store.get(&task.id).await.unwrap();
        assert_eq!(final_task.status, TaskStatus::InProgress);
        assert_eq!(final_task.priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn retry_only_applies_to_failed_or_cancelled() {
        let store = TaskStore::new();
        let task = store.create(new_task("T1")).await.unwrap();
        assert!(matches!(
            store.retry(&task.id).await,
            Err(DaemonError::Validation(_))
        ));

        store.set_status(&task.id, TaskStatus::Failed).await.unwrap();
        let retried = store.retry(&task.id).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn query_applies_filter_offset_and_limit_oldest_first() {
        let store = TaskStore::new();
        for i in 0..5 {
            let mut t = new_task(&format!("task {i}"));
            t.priority = Some(TaskPriority::High);
            store.create(t).await.unwrap();
        }
        store.create(new_task("low importance")).await.unwrap();

        let filter = TaskFilter {
            priority: Some(vec![TaskPriority::High]),
            limit: Some(2),
            offset: 1,
            ..TaskFilter::default()
        };
        let page = store.query(&filter).await;
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "task 1");
        assert_eq!(page[1].title, "task 2");
    }

    #[test]
    fn filter_parsing_accepts_scalar_or_list_and_ignores_junk_limits() {
        let data = serde_json::json!({
            "status": "todo",
            "priority": ["high", "low"],
            "limit": "plenty",
            "offset": "nope"
        });
        let filter = TaskFilter::from_value(&data);
        assert_eq!(filter.status, Some(vec![TaskStatus::Todo]));
        assert_eq!(
            filter.priority,
            Some(vec![TaskPriority::High, TaskPriority::Low])
        );
        assert_eq!(filter.limit, None);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn status_serializes_with_kebab_wire_names() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            serde_json::json!("in-progress")
        );
    }
}
