//! Work items travelling through the task and notify queues.

use serde::{Deserialize, Serialize};

use crate::job_events::{MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED};
use crate::types::{DbId, Power};

/// A unit of submitted work awaiting a free worker.
///
/// Consumed exactly once by one worker service, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: DbId,
    /// Opaque generation parameters, forwarded untouched to the backend.
    pub payload: serde_json::Value,
    /// Power already reserved from the user's balance for this task.
    pub power: Power,
}

impl Task {
    /// Create a task with a freshly generated identifier.
    pub fn new(user_id: DbId, payload: serde_json::Value, power: Power) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            payload,
            power,
        }
    }
}

/// A message destined for one user's live session. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub user_id: DbId,
    /// Serialized JSON payload pushed verbatim to the client.
    pub message: String,
}

impl NotifyMessage {
    /// Completion notice carrying the generation result and, when the
    /// backend declares one, its model tag.
    pub fn completed(task: &Task, result: &serde_json::Value, model: Option<&str>) -> Self {
        Self::from_json(
            task.user_id,
            serde_json::json!({
                "type": MSG_TYPE_JOB_COMPLETED,
                "task_id": task.task_id,
                "result": result,
                "model": model,
            }),
        )
    }

    /// Failure notice carrying a human-readable error.
    pub fn failed(task: &Task, error: &str) -> Self {
        Self::from_json(
            task.user_id,
            serde_json::json!({
                "type": MSG_TYPE_JOB_FAILED,
                "task_id": task.task_id,
                "error": error,
            }),
        )
    }

    fn from_json(user_id: DbId, payload: serde_json::Value) -> Self {
        Self {
            user_id,
            message: payload.to_string(),
        }
    }
}
