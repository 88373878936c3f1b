//! Row model for the `sd_jobs` table.

use sdpool_core::job::{Job, JobState};
use sdpool_core::store::StoreError;
use sdpool_core::types::{DbId, Power, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sd_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SdJob {
    pub id: DbId,
    pub task_id: String,
    pub user_id: DbId,
    /// `-1` failed, `0` pending, `1..=99` running, `100` completed.
    pub progress: i16,
    pub power: Power,
    pub created_at: Timestamp,
}

impl TryFrom<SdJob> for Job {
    type Error = StoreError;

    fn try_from(row: SdJob) -> Result<Self, Self::Error> {
        let state = JobState::from_progress(row.progress).map_err(|e| {
            StoreError::InvalidRecord(format!("sd_jobs.id {}: {e}", row.id))
        })?;
        Ok(Job {
            task_id: row.task_id,
            user_id: row.user_id,
            state,
            power: row.power,
            created_at: row.created_at,
        })
    }
}
