pub mod sessions;
pub mod system;
pub mod tasks;

use serde_json::Value;

use crate::error::{DaemonError, DaemonResult};

/// Serialize a handler payload. A serde failure surfaces as an internal
/// error frame, never a panic or an empty response.
pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> DaemonResult<Value> {
    serde_json::to_value(value).map_err(|e| DaemonError::Internal(e.into()))
}
