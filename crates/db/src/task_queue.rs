//! [`Queue<Task>`] backed by the `sd_tasks` table.
//!
//! Producers in any process push by inserting a row; consumers poll with
//! [`SdTaskRepo::claim_next`]. Tasks outlive the process: closing the queue
//! stops consumption but leaves queued rows for the next run.

use std::time::Duration;

use async_trait::async_trait;
use sdpool_core::queue::{Queue, QueueError};
use sdpool_core::task::Task;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::models::sd_task::SdTask;
use crate::repositories::SdTaskRepo;
use crate::DbPool;

/// Default delay between claim attempts on an empty queue.
pub const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shared, persistent FIFO task queue.
pub struct PgTaskQueue {
    pool: DbPool,
    poll_interval: Duration,
    closed: CancellationToken,
}

impl PgTaskQueue {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_TASK_POLL_INTERVAL,
            closed: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Reject further pushes and wake waiting consumers with
    /// [`QueueError::Closed`]. Queued rows are kept.
    pub fn close(&self) {
        tracing::info!("Task queue closed");
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of tasks waiting to be claimed.
    pub async fn pending(&self) -> Result<i64, QueueError> {
        SdTaskRepo::count(&self.pool).await.map_err(unavailable)
    }

    /// One claim attempt.
    ///
    /// The query runs in its own task so that dropping `pop` mid-claim
    /// cannot lose a row: if nobody is left to receive it, the claimed row
    /// is restored.
    async fn claim(&self) -> Result<Option<Task>, QueueError> {
        let pool = self.pool.clone();
        let (tx, rx) = oneshot::channel::<Result<Option<SdTask>, sqlx::Error>>();

        tokio::spawn(async move {
            let claimed = SdTaskRepo::claim_next(&pool).await;
            if let Err(Ok(Some(row))) = tx.send(claimed) {
                if let Err(e) = SdTaskRepo::restore(&pool, &row).await {
                    tracing::error!(task_id = %row.task_id, error = %e, "Failed to restore abandoned task claim");
                }
            }
        });

        match rx.await {
            Ok(claimed) => claimed
                .map(|row| row.map(Task::from))
                .map_err(unavailable),
            Err(_) => Err(QueueError::Unavailable("claim task aborted".into())),
        }
    }
}

fn unavailable(err: sqlx::Error) -> QueueError {
    QueueError::Unavailable(err.to_string())
}

#[async_trait]
impl Queue<Task> for PgTaskQueue {
    async fn push(&self, task: Task) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        SdTaskRepo::enqueue(&self.pool, &task)
            .await
            .map_err(unavailable)?;
        tracing::debug!(task_id = %task.task_id, user_id = task.user_id, "Task queued");
        Ok(())
    }

    async fn pop(&self) -> Result<Task, QueueError> {
        loop {
            if self.closed.is_cancelled() {
                return Err(QueueError::Closed);
            }
            if let Some(task) = self.claim().await? {
                return Ok(task);
            }
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(QueueError::Closed),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
