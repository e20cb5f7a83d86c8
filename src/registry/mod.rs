//! Notification subscriptions and monitoring sessions.
//!
//! Both registries live behind a single `RwLock<HashMap>` each; every update
//! replaces the whole record under the write lock, so a record always has
//! exactly one logical owner per update and partial merges cannot race.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{DaemonError, DaemonResult};
use crate::ids;
use crate::tasks::TaskFilter;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub session_id: String,
    /// Stored exactly as supplied — subscribing to an id that does not
    /// (yet) exist is not an error.
    pub task_ids: Vec<String>,
    pub include_raw_response: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSession {
    pub id: String,
    pub filters: TaskFilter,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    sessions: RwLock<HashMap<String, MonitoringSession>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Notification subscriptions ───────────────────────────────────────────

    /// Register interest in a set of task ids. A missing session id gets a
    /// generated `client_<millis>_<alnum>` one. Re-subscribing under an
    /// existing id replaces the record wholesale.
    pub async fn subscribe(
        &self,
        session_id: Option<String>,
        task_ids: Vec<String>,
        include_raw_response: bool,
    ) -> Subscription {
        let session_id = match session_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => ids::generate("client"),
        };
        let subscription = Subscription {
            session_id: session_id.clone(),
            task_ids,
            include_raw_response,
            created_at: Utc::now(),
        };
        self.subscriptions
            .write()
            .await
            .insert(session_id, subscription.clone());
        subscription
    }

    /// Idempotent: removing an unknown id is a no-op.
    pub async fn unsubscribe(&self, session_id: &str) -> bool {
        self.subscriptions.write().await.remove(session_id).is_some()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    // ── Monitoring sessions ──────────────────────────────────────────────────

    pub async fn create_session(&self, filters: TaskFilter) -> MonitoringSession {
        let session = MonitoringSession {
            id: ids::generate("client"),
            filters,
            created_at: Utc::now(),
            active: true,
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Replace the stored filters wholesale. A partial merge could silently
    /// resurrect fields from a concurrent writer, so the whole predicate is
    /// swapped in one write.
    pub async fn update_session(
        &self,
        id: &str,
        filters: TaskFilter,
    ) -> DaemonResult<MonitoringSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| DaemonError::not_found("monitoring session", id))?;
        if !session.active {
            return Err(DaemonError::validation(format!(
                "monitoring session '{id}' is closed"
            )));
        }
        session.filters = filters;
        Ok(session.clone())
    }

    pub async fn get_session(&self, id: &str) -> DaemonResult<MonitoringSession> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DaemonError::not_found("monitoring session", id))
    }

    /// All sessions, newest first.
    pub async fn list_sessions(&self) -> Vec<MonitoringSession> {
        let mut sessions: Vec<MonitoringSession> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Mark inactive. Further delivery and filter updates stop; the record
    /// remains readable.
    pub async fn close_session(&self, id: &str) -> DaemonResult<MonitoringSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| DaemonError::not_found("monitoring session", id))?;
        session.active = false;
        Ok(session.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
