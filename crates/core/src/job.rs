//! Persisted progress record for a task, and the rules that decide when a
//! job has been abandoned.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Power, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Stored progress value of a job that has failed.
pub const FAILED_PROGRESS: i16 = -1;

/// Stored progress value of a finished job.
pub const COMPLETED_PROGRESS: i16 = 100;

/// Jobs older than this that have not completed are considered abandoned.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// `Completed` is terminal and owned by the worker that ran the task;
/// `Failed` is terminal and owned by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "percent", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    /// Percentage in `1..=99`.
    Running(u8),
    Completed,
    Failed,
}

impl JobState {
    /// Build a running state, folding 0 into `Pending` and 100+ into
    /// `Completed`.
    pub fn running(percent: u8) -> Self {
        match percent {
            0 => Self::Pending,
            p if p >= 100 => Self::Completed,
            p => Self::Running(p),
        }
    }

    /// Decode the integer representation stored in `sd_jobs.progress`.
    pub fn from_progress(progress: i16) -> Result<Self, CoreError> {
        match progress {
            FAILED_PROGRESS => Ok(Self::Failed),
            0 => Ok(Self::Pending),
            COMPLETED_PROGRESS => Ok(Self::Completed),
            p @ 1..=99 => Ok(Self::Running(p as u8)),
            other => Err(CoreError::Validation(format!(
                "Job progress {other} is outside -1..=100"
            ))),
        }
    }

    /// Encode as the integer stored in `sd_jobs.progress`.
    pub fn progress(self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Running(p) => i16::from(p),
            Self::Completed => COMPLETED_PROGRESS,
            Self::Failed => FAILED_PROGRESS,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Progress and cost record for one task. At most one live job exists per
/// `task_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub task_id: String,
    pub user_id: DbId,
    pub state: JobState,
    /// Power reserved for the task; refunded if the job expires or fails.
    pub power: Power,
    pub created_at: Timestamp,
}

impl Job {
    /// A fresh pending job, as created when a worker accepts a task.
    pub fn pending(task_id: impl Into<String>, user_id: DbId, power: Power) -> Self {
        Self {
            task_id: task_id.into(),
            user_id,
            state: JobState::Pending,
            power,
            created_at: chrono::Utc::now(),
        }
    }

    /// Whether the reconciler should expire this job at `now`.
    ///
    /// A failed job is eligible regardless of age. A completed job is never
    /// eligible. Anything else is eligible once it is strictly older than
    /// `ttl`.
    pub fn is_expired(&self, now: Timestamp, ttl: Duration) -> bool {
        match self.state {
            JobState::Completed => false,
            JobState::Failed => true,
            JobState::Pending | JobState::Running(_) => {
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(self.created_at) > ttl
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
