//! Queue and processing-time aggregation.
//!
//! Everything here is a pure function of a task snapshot — recompute on
//! demand, never stored. The broadcaster computes one snapshot per tick and
//! fans the same payload to every connection.

pub mod impact;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::{CancelledBucket, MetricsConfig};
use crate::tasks::{Task, TaskPriority, TaskStatus};

// ─── Report types ────────────────────────────────────────────────────────────

/// Abbreviated task entry used inside per-priority queues.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// One measured task duration, for the fastest/slowest extrema.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDuration {
    pub task_id: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    /// Arithmetic mean over terminal tasks; `0` when none have finished
    /// (a defined sentinel — the wire never carries NaN).
    pub average_ms: f64,
    pub sample_count: usize,
    pub fastest: Option<TaskDuration>,
    pub slowest: Option<TaskDuration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTask {
    pub task_id: String,
    pub title: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub total: usize,
    /// todo
    pub pending: usize,
    pub in_progress: usize,
    /// done
    pub completed: usize,
    /// failed, plus cancelled when `cancelled_bucket = "failed"`.
    pub failed: usize,
    pub cancelled: usize,
    pub by_status: HashMap<String, usize>,
    pub by_priority: HashMap<String, usize>,
    /// Non-terminal tasks grouped by priority, oldest first.
    pub queue_by_priority: HashMap<String, Vec<QueuedTask>>,
    pub processing_times: ProcessingStats,
    /// Newest-first, bounded by `recent_failed_limit`.
    pub recent_failed: Vec<FailedTask>,
    pub generated_at: DateTime<Utc>,
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

pub fn queue_snapshot(tasks: &[Task], config: &MetricsConfig) -> QueueSnapshot {
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut by_priority: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
        *by_priority
            .entry(task.priority.as_str().to_string())
            .or_default() += 1;
    }

    let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
    let cancelled = count(TaskStatus::Cancelled);
    let failed = match config.cancelled_bucket {
        CancelledBucket::Separate => count(TaskStatus::Failed),
        CancelledBucket::Failed => count(TaskStatus::Failed) + cancelled,
    };

    QueueSnapshot {
        total: tasks.len(),
        pending: count(TaskStatus::Todo),
        in_progress: count(TaskStatus::InProgress),
        completed: count(TaskStatus::Done),
        failed,
        cancelled,
        by_status,
        by_priority,
        queue_by_priority: queues_by_priority(tasks),
        processing_times: processing_stats(tasks),
        recent_failed: recent_failed(tasks, config.recent_failed_limit),
        generated_at: Utc::now(),
    }
}

fn queues_by_priority(tasks: &[Task]) -> HashMap<String, Vec<QueuedTask>> {
    let mut queues: HashMap<String, Vec<QueuedTask>> = HashMap::new();
    for priority in [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low] {
        let mut queue: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.priority == priority && !t.status.is_terminal())
            .collect();
        queue.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        queues.insert(
            priority.as_str().to_string(),
            queue
                .into_iter()
                .map(|t| QueuedTask {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    status: t.status,
                    created_at: t.created_at,
                })
                .collect(),
        );
    }
    queues
}

/// Durations are measured over terminal tasks only: a task still in flight
/// has no meaningful processing time.
fn processing_stats(tasks: &[Task]) -> ProcessingStats {
    let durations: Vec<TaskDuration> = tasks
        .iter()
        .filter(|t| t.status.is_terminal())
        .map(|t| TaskDuration {
            task_id: t.id.clone(),
            duration_ms: (t.updated_at - t.created_at).num_milliseconds(),
        })
        .collect();

    if durations.is_empty() {
        return ProcessingStats {
            average_ms: 0.0,
            sample_count: 0,
            fastest: None,
            slowest: None,
        };
    }

    let sum: i64 = durations.iter().map(|d| d.duration_ms).sum();
    let fastest = durations.iter().min_by_key(|d| d.duration_ms).cloned();
    let slowest = durations.iter().max_by_key(|d| d.duration_ms).cloned();
    ProcessingStats {
        average_ms: sum as f64 / durations.len() as f64,
        sample_count: durations.len(),
        fastest,
        slowest,
    }
}

fn recent_failed(tasks: &[Task], limit: usize) -> Vec<FailedTask> {
    let mut failed: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .collect();
    failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
    failed
        .into_iter()
        .take(limit)
        .map(|t| FailedTask {
            task_id: t.id.clone(),
            title: t.title.clone(),
            failed_at: t.updated_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(id: &str, status: TaskStatus, priority: TaskPriority) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            description: String::new(),
            status,
            priority,
            created_by: String::new(),
            assigned_to: None,
            dependencies: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn config() -> MetricsConfig {
        MetricsConfig::default()
    }

    #[test]
    fn empty_snapshot_has_zero_counts_and_sentinel_average() {
        let snap = queue_snapshot(&[], &config());
        assert_eq!(snap.total, 0);
        assert_eq!(snap.processing_times.average_ms, 0.0);
        assert!(snap.processing_times.fastest.is_none());
        assert!(snap.recent_failed.is_empty());
    }

    #[test]
    fn by_status_counts_sum_to_total() {
        let tasks = vec![
            task("a", TaskStatus::Todo, TaskPriority::High),
            task("b", TaskStatus::InProgress, TaskPriority::Low),
            task("c", TaskStatus::Done, TaskPriority::Medium),
            task("d", TaskStatus::Failed, TaskPriority::Medium),
            task("e", TaskStatus::Cancelled, TaskPriority::Medium),
        ];
        let snap = queue_snapshot(&tasks, &config());
        assert_eq!(snap.by_status.values().sum::<usize>(), snap.total);
        assert_eq!(snap.pending, 1);
        assert_eq!(snap.in_progress, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cancelled, 1);
    }

    #[test]
    fn cancelled_bucket_config_folds_cancelled_into_failed() {
        let tasks = vec![
            task("a", TaskStatus::Failed, TaskPriority::High),
            task("b", TaskStatus::Cancelled, TaskPriority::High),
        ];
        let cfg = MetricsConfig {
            cancelled_bucket: CancelledBucket::Failed,
            ..MetricsConfig::default()
        };
        let snap = queue_snapshot(&tasks, &cfg);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.cancelled, 1);
        // Histogram is unaffected by the bucket mapping.
        assert_eq!(snap.by_status["failed"], 1);
        assert_eq!(snap.by_status["cancelled"], 1);
    }

    #[test]
    fn queues_hold_only_non_terminal_tasks_oldest_first() {
        let mut old = task("old", TaskStatus::Todo, TaskPriority::High);
        old.created_at = old.created_at - Duration::seconds(60);
        let tasks = vec![
            task("new", TaskStatus::InProgress, TaskPriority::High),
            old,
            task("done", TaskStatus::Done, TaskPriority::High),
        ];
        let snap = queue_snapshot(&tasks, &config());
        let high = &snap.queue_by_priority["high"];
        assert_eq!(high.len(), 2);
        assert_eq!(high[0].id, "old");
        assert_eq!(high[1].id, "new");
    }

    #[test]
    fn processing_stats_cover_terminal_tasks_only() {
        let mut fast = task("fast", TaskStatus::Done, TaskPriority::Medium);
        fast.updated_at = fast.created_at + Duration::milliseconds(100);
        let mut slow = task("slow", TaskStatus::Failed, TaskPriority::Medium);
        slow.updated_at = slow.created_at + Duration::milliseconds(300);
        let mut in_flight = task("open", TaskStatus::InProgress, TaskPriority::Medium);
        in_flight.updated_at = in_flight.created_at + Duration::milliseconds(900);

        let snap = queue_snapshot(&[fast, slow, in_flight], &config());
        let stats = snap.processing_times;
        assert_eq!(stats.sample_count, 2);
        assert_eq!(stats.average_ms, 200.0);
        assert_eq!(stats.fastest.unwrap().task_id, "fast");
        assert_eq!(stats.slowest.unwrap().task_id, "slow");
    }

    #[test]
    fn recent_failed_is_bounded_and_newest_first() {
        let mut tasks = Vec::new();
        for i in 0..15 {
            let mut t = task(&format!("f{i:02}"), TaskStatus::Failed, TaskPriority::Low);
            t.updated_at = t.created_at + Duration::seconds(i);
            tasks.push(t);
        }
        let snap = queue_snapshot(&tasks, &config());
        assert_eq!(snap.recent_failed.len(), 10);
        assert_eq!(snap.recent_failed[0].task_id, "f14");
        assert_eq!(snap.recent_failed[9].task_id, "f05");
    }
}
