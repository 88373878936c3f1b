//! Persistence contracts for job bookkeeping and the credit ledger.
//!
//! The reconciler's exactly-once refund is a single atomic unit,
//! [`CreditLedger::expire_and_refund`], made of three writes:
//!
//! 1. Remove the job only if its stored progress still equals the progress
//!    the caller observed. Of two racing reconcilers, or a reconciler racing
//!    the worker's completion, exactly one wins.
//! 2. Add the job's power to the owner's balance only if the account
//!    exists, reporting the resulting balance (see [`CreditOutcome`]).
//! 3. Append a refund entry, only when step 2 applied.
//!
//! Either all of the writes land or none do. A failure anywhere leaves the
//! job in place, so a later cycle observes it again and retries.

use async_trait::async_trait;

use crate::job::{Job, JobState};
use crate::ledger::LedgerEntry;
use crate::types::{DbId, Power};

/// Errors returned by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness invariant would be violated (e.g. duplicate task id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into a domain value.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The backing store failed; the operation may be retried later.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Persistent record of in-flight job progress and cost.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::Conflict`] if a live job
    /// already exists for the same task id.
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    /// Move a job to `state`, only while its current state is non-terminal.
    ///
    /// Returns `false` if the job no longer exists or is already
    /// completed or failed.
    async fn update_progress(&self, task_id: &str, state: JobState) -> Result<bool, StoreError>;

    /// All jobs whose stored progress is strictly below 100.
    async fn find_incomplete(&self) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-delete: remove the job only if its stored state still
    /// equals `job.state`. Returns whether a record was removed.
    async fn delete(&self, job: &Job) -> Result<bool, StoreError>;
}

/// Result of a conditional balance credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Exactly one account was updated.
    Applied {
        username: String,
        balance_after: Power,
    },
    /// No account matched; nothing changed.
    NotApplied,
}

/// Result of [`CreditLedger::expire_and_refund`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The job was removed, its power credited back and an entry appended.
    Refunded {
        username: String,
        balance_after: Power,
    },
    /// The job was removed but its owner no longer exists.
    OwnerMissing,
    /// The job was already removed or its progress changed; nothing written.
    Lost,
}

/// Append-only ledger of credit adjustments tied to user balances.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Atomically add `amount` to the balance of `user_id`.
    async fn conditional_credit(
        &self,
        user_id: DbId,
        amount: Power,
    ) -> Result<CreditOutcome, StoreError>;

    /// Append an audit entry.
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Expire `job` and refund its power to the owner in one atomic unit.
    ///
    /// The delete is keyed on `job.state` as observed by the caller. The
    /// refund entry is attributed to `model`. On error nothing is written.
    async fn expire_and_refund(
        &self,
        job: &Job,
        model: &str,
    ) -> Result<ExpireOutcome, StoreError>;
}
