//! Adapters from the repositories to the `sdpool_core` store traits.

use async_trait::async_trait;
use sdpool_core::job::{Job, JobState};
use sdpool_core::ledger::LedgerEntry;
use sdpool_core::store::{CreditLedger, CreditOutcome, ExpireOutcome, JobStore, StoreError};
use sdpool_core::types::{DbId, Power};

use crate::models::power_log::CreatePowerLog;
use crate::repositories::{PowerLogRepo, RefundRepo, SdJobRepo, UserRepo};
use crate::DbPool;

/// PostgreSQL unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Translate a sqlx error into the store taxonomy.
///
/// Unique violations on `uq_` constraints become [`StoreError::Conflict`];
/// everything else is a retryable [`StoreError::Backend`].
pub fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let constraint = db_err.constraint().unwrap_or("unknown");
            if constraint.starts_with("uq_") {
                return StoreError::Conflict(format!(
                    "Duplicate value violates unique constraint: {constraint}"
                ));
            }
        }
    }
    StoreError::Backend(err.to_string())
}

// ---------------------------------------------------------------------------
// PgJobStore
// ---------------------------------------------------------------------------

/// [`JobStore`] backed by the `sd_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        SdJobRepo::create(&self.pool, job)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    async fn update_progress(&self, task_id: &str, state: JobState) -> Result<bool, StoreError> {
        SdJobRepo::update_progress(&self.pool, task_id, state.progress())
            .await
            .map_err(classify_sqlx_error)
    }

    async fn find_incomplete(&self) -> Result<Vec<Job>, StoreError> {
        let rows = SdJobRepo::find_incomplete(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;

        // Undecodable rows are skipped, not fatal.
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match Job::try_from(row) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable job row"),
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, job: &Job) -> Result<bool, StoreError> {
        SdJobRepo::delete_if_progress(&self.pool, &job.task_id, job.state.progress())
            .await
            .map_err(classify_sqlx_error)
    }
}

// ---------------------------------------------------------------------------
// PgCreditLedger
// ---------------------------------------------------------------------------

/// [`CreditLedger`] backed by `users.power` and the `power_logs` table.
#[derive(Clone)]
pub struct PgCreditLedger {
    pool: DbPool,
}

impl PgCreditLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn conditional_credit(
        &self,
        user_id: DbId,
        amount: Power,
    ) -> Result<CreditOutcome, StoreError> {
        let updated = UserRepo::credit_power(&self.pool, user_id, amount)
            .await
            .map_err(classify_sqlx_error)?;

        Ok(match updated {
            Some(user) => CreditOutcome::Applied {
                username: user.username,
                balance_after: user.power,
            },
            None => CreditOutcome::NotApplied,
        })
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        PowerLogRepo::create(&self.pool, &CreatePowerLog::from(entry))
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    async fn expire_and_refund(
        &self,
        job: &Job,
        model: &str,
    ) -> Result<ExpireOutcome, StoreError> {
        RefundRepo::expire_and_refund(&self.pool, job, model)
            .await
            .map_err(classify_sqlx_error)
    }
}
