//! Transactional expiry of a job together with its refund.
//!
//! Spans `sd_jobs`, `users` and `power_logs`. Any failure rolls the whole
//! unit back, leaving the job row in place for the next reconcile cycle.

use sdpool_core::job::Job;
use sdpool_core::ledger::LedgerEntry;
use sdpool_core::store::ExpireOutcome;
use sdpool_core::types::{DbId, Power};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::power_log::CreatePowerLog;
use crate::models::user::UserBalance;

/// Provides the atomic expire-and-refund operation.
pub struct RefundRepo;

impl RefundRepo {
    /// Delete `job` if its stored progress still matches, credit its power
    /// back to the owner and append a refund row attributed to `model`.
    pub async fn expire_and_refund(
        pool: &PgPool,
        job: &Job,
        model: &str,
    ) -> Result<ExpireOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        if !Self::delete_observed(&mut tx, &job.task_id, job.state.progress()).await? {
            tx.rollback().await?;
            return Ok(ExpireOutcome::Lost);
        }

        let Some(user) = Self::credit(&mut tx, job.user_id, job.power).await? else {
            tx.commit().await?;
            return Ok(ExpireOutcome::OwnerMissing);
        };

        let entry = LedgerEntry::refund(job, user.username.clone(), user.power, model);
        Self::append_log(&mut tx, &CreatePowerLog::from(&entry)).await?;

        tx.commit().await?;
        Ok(ExpireOutcome::Refunded {
            username: user.username,
            balance_after: user.power,
        })
    }

    async fn delete_observed(
        tx: &mut Transaction<'_, Postgres>,
        task_id: &str,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sd_jobs WHERE task_id = $1 AND progress = $2")
            .bind(task_id)
            .bind(progress)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit(
        tx: &mut Transaction<'_, Postgres>,
        user_id: DbId,
        amount: Power,
    ) -> Result<Option<UserBalance>, sqlx::Error> {
        sqlx::query_as::<_, UserBalance>(
            "UPDATE users SET power = power + $2 WHERE id = $1 \
             RETURNING id, username, power",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn append_log(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreatePowerLog<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO power_logs \
                 (user_id, username, kind_id, amount, balance, model, remark, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(input.user_id)
        .bind(input.username)
        .bind(input.kind_id)
        .bind(input.amount)
        .bind(input.balance)
        .bind(input.model)
        .bind(input.remark)
        .bind(input.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
