//! Repository for the `sd_jobs` table.
//!
//! Progress transitions and deletes are conditional so that the owning
//! worker and the reconciler can never both claim the same terminal
//! transition.

use sdpool_core::job::{Job, COMPLETED_PROGRESS};
use sqlx::PgPool;

use crate::models::sd_job::SdJob;

/// Column list for `sd_jobs` queries.
const COLUMNS: &str = "id, task_id, user_id, progress, power, created_at";

/// Provides CRUD operations for in-flight generation jobs.
pub struct SdJobRepo;

impl SdJobRepo {
    /// Insert a job row. Fails with a `uq_sd_jobs_task_id` violation if a
    /// row for the task already exists.
    pub async fn create(pool: &PgPool, job: &Job) -> Result<SdJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO sd_jobs (task_id, user_id, progress, power, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SdJob>(&query)
            .bind(&job.task_id)
            .bind(job.user_id)
            .bind(job.state.progress())
            .bind(job.power)
            .bind(job.created_at)
            .fetch_one(pool)
            .await
    }

    /// Set the progress of a job that is still pending or running.
    ///
    /// Returns `false` if the job is gone or already completed/failed.
    pub async fn update_progress(
        pool: &PgPool,
        task_id: &str,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sd_jobs SET progress = $2 \
             WHERE task_id = $1 AND progress >= 0 AND progress < $3",
        )
        .bind(task_id)
        .bind(progress)
        .bind(COMPLETED_PROGRESS)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// All jobs that have not completed, oldest first.
    pub async fn find_incomplete(pool: &PgPool) -> Result<Vec<SdJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sd_jobs WHERE progress < $1 ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, SdJob>(&query)
            .bind(COMPLETED_PROGRESS)
            .fetch_all(pool)
            .await
    }

    /// Find a job by its task identifier.
    pub async fn find_by_task_id(
        pool: &PgPool,
        task_id: &str,
    ) -> Result<Option<SdJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sd_jobs WHERE task_id = $1");
        sqlx::query_as::<_, SdJob>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Delete a job only if its stored progress still equals `progress`.
    ///
    /// Returns `true` if a row was removed.
    pub async fn delete_if_progress(
        pool: &PgPool,
        task_id: &str,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sd_jobs WHERE task_id = $1 AND progress = $2")
            .bind(task_id)
            .bind(progress)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
