//! Repository for the `sd_tasks` table, the shared task queue.
//!
//! Any process with database access can enqueue. Claims delete the oldest
//! row with `FOR UPDATE SKIP LOCKED`, so concurrent consumers never receive
//! the same task.

use sdpool_core::task::Task;
use sqlx::PgPool;

use crate::models::sd_task::SdTask;

/// Column list for `sd_tasks` queries.
const COLUMNS: &str = "id, task_id, user_id, payload, power, created_at";

/// Provides enqueue and claim operations for submitted tasks.
pub struct SdTaskRepo;

impl SdTaskRepo {
    /// Append a task. Fails with a `uq_sd_tasks_task_id` violation if the
    /// task is already queued.
    pub async fn enqueue(pool: &PgPool, task: &Task) -> Result<SdTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO sd_tasks (task_id, user_id, payload, power) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SdTask>(&query)
            .bind(&task.task_id)
            .bind(task.user_id)
            .bind(&task.payload)
            .bind(task.power)
            .fetch_one(pool)
            .await
    }

    /// Atomically remove and return the oldest queued task.
    ///
    /// Returns `None` if the queue is empty or every row is locked by
    /// another consumer.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<SdTask>, sqlx::Error> {
        let query = format!(
            "DELETE FROM sd_tasks \
             WHERE id = ( \
                 SELECT id FROM sd_tasks \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SdTask>(&query).fetch_optional(pool).await
    }

    /// Put back a claimed row under its original id, keeping its place in
    /// the queue.
    pub async fn restore(pool: &PgPool, row: &SdTask) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sd_tasks (id, task_id, user_id, payload, power, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(row.id)
        .bind(&row.task_id)
        .bind(row.user_id)
        .bind(&row.payload)
        .bind(row.power)
        .bind(row.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Number of queued tasks.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sd_tasks")
            .fetch_one(pool)
            .await
    }
}
