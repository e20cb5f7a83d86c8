use serde::Deserialize;
use serde_json::Value;

use crate::error::{DaemonError, DaemonResult};
use crate::tasks::{NewTask, TaskPriority, TaskStatus};

/// One control-protocol request frame: `{"command": ..., "data": {...}}`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    #[serde(default)]
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateParams {
    #[serde(default)]
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityUpdateParams {
    #[serde(default)]
    pub task_id: String,
    pub priority: TaskPriority,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub include_raw_response: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdParams {
    #[serde(default)]
    pub session_id: String,
}

/// Closed union of every command the gateway understands. An unrecognized
/// tag parses into `Unknown` and answers with a validation error instead of
/// tearing anything down.
#[derive(Debug)]
pub enum Command {
    CreateTask(NewTask),
    GetTask(TaskIdParams),
    ListTasks,
    ListTasksFiltered(Value),
    UpdateTaskStatus(StatusUpdateParams),
    UpdateTaskPriority(PriorityUpdateParams),
    DeleteTask(TaskIdParams),
    GetTaskStatus(TaskIdParams),
    CancelTask(TaskIdParams),
    RetryTask(TaskIdParams),
    GetQueueMetrics,
    AnalyzeTaskImpact(TaskIdParams),
    ValidateTaskDependencies,
    SubscribeToTaskNotifications(SubscribeParams),
    UnsubscribeFromTaskNotifications(SessionIdParams),
    CreateMonitoringSession(Value),
    UpdateMonitoringSession(SessionIdParams, Value),
    GetMonitoringSession(SessionIdParams),
    ListMonitoringSessions,
    CloseMonitoringSession(SessionIdParams),
    GetWebSocketStatus,
    RestartSystem,
    Ping,
    Unknown(String),
}

fn params<T: serde::de::DeserializeOwned>(data: &Value) -> DaemonResult<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| DaemonError::validation(format!("invalid request data: {e}")))
}

impl Command {
    pub fn from_envelope(envelope: &Envelope) -> DaemonResult<Self> {
        let data = &envelope.data;
        Ok(match envelope.command.as_str() {
            "createTask" => Self::CreateTask(params(data)?),
            "getTask" => Self::GetTask(params(data)?),
            "listTasks" => Self::ListTasks,
            "listTasksFiltered" => Self::ListTasksFiltered(data.clone()),
            "updateTaskStatus" => Self::UpdateTaskStatus(params(data)?),
            "updateTaskPriority" => Self::UpdateTaskPriority(params(data)?),
            "deleteTask" => Self::DeleteTask(params(data)?),
            "getTaskStatus" => Self::GetTaskStatus(params(data)?),
            "cancelTask" => Self::CancelTask(params(data)?),
            "retryTask" => Self::RetryTask(params(data)?),
            "getQueueMetrics" => Self::GetQueueMetrics,
            "analyzeTaskImpact" => Self::AnalyzeTaskImpact(params(data)?),
            "validateTaskDependencies" => Self::ValidateTaskDependencies,
            "subscribeToTaskNotifications" => Self::SubscribeToTaskNotifications(params(data)?),
            "unsubscribeFromTaskNotifications" => {
                Self::UnsubscribeFromTaskNotifications(params(data)?)
            }
            "createMonitoringSession" => Self::CreateMonitoringSession(data.clone()),
            "updateMonitoringSession" => Self::UpdateMonitoringSession(params(data)?, data.clone()),
            "getMonitoringSession" => Self::GetMonitoringSession(params(data)?),
            "listMonitoringSessions" => Self::ListMonitoringSessions,
            "closeMonitoringSession" => Self::CloseMonitoringSession(params(data)?),
            "getWebSocketStatus" => Self::GetWebSocketStatus,
            "restartSystem" => Self::RestartSystem,
            "ping" => Self::Ping,
            other => Self::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(command: &str, data: Value) -> DaemonResult<Command> {
        Command::from_envelope(&Envelope {
            command: command.to_string(),
            data,
        })
    }

    #[test]
    fn known_commands_parse_with_typed_params() {
        let cmd = parse("updateTaskStatus", json!({"taskId": "t1", "status": "in-progress"}))
            .unwrap();
        match cmd {
            Command::UpdateTaskStatus(p) => {
                assert_eq!(p.task_id, "t1");
                assert_eq!(p.status, TaskStatus::InProgress);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_its_own_variant() {
        match parse("launchMissiles", json!({})).unwrap() {
            Command::Unknown(name) => assert_eq!(name, "launchMissiles"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn bad_params_are_a_validation_error() {
        let err = parse("updateTaskStatus", json!({"taskId": "t1", "status": "bogus"}))
            .unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));
    }

    #[test]
    fn missing_data_defaults_to_null_object() {
        let envelope: Envelope = serde_json::from_str(r#"{"command":"listTasks"}"#).unwrap();
        assert!(matches!(
            Command::from_envelope(&envelope).unwrap(),
            Command::ListTasks
        ));
    }
}
