use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

/// Everything a command handler can fail with.
///
/// Validation and not-found are expected outcomes and serialize with their
/// own message. Internal errors are logged in full and serialize as a
/// generic message — handler failure detail never reaches the wire.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl DaemonError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound(format!("{what} '{id}' not found"))
    }

    /// Render as a protocol response frame: `{"success":false,"error":{"message":...}}`.
    pub fn to_response(&self) -> Value {
        let message = match self {
            Self::Internal(e) => {
                error!(err = %e, "internal handler error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        json!({ "success": false, "error": { "message": message } })
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
