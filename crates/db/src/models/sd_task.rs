//! Row model for the `sd_tasks` table.

use sdpool_core::task::Task;
use sdpool_core::types::{DbId, Power, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sd_tasks` table: a submitted task not yet claimed.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SdTask {
    /// Insertion order; claims take the lowest id first.
    pub id: DbId,
    pub task_id: String,
    pub user_id: DbId,
    pub payload: serde_json::Value,
    pub power: Power,
    pub created_at: Timestamp,
}

impl From<SdTask> for Task {
    fn from(row: SdTask) -> Self {
        Task {
            task_id: row.task_id,
            user_id: row.user_id,
            payload: row.payload,
            power: row.power,
        }
    }
}
