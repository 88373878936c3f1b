//! Credit ledger entries (the `power_logs` audit trail).

use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::types::{DbId, Power, Timestamp};

/// Kind ID type matching SMALLINT in the database.
pub type LedgerKindId = i16;

/// Direction of a credit adjustment.
///
/// Discriminants match the `kind_id` values stored in `power_logs`.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Consume = 1,
    Refund = 2,
}

impl LedgerKind {
    /// Return the database kind ID.
    pub fn id(self) -> LedgerKindId {
        self as LedgerKindId
    }

    /// Resolve a database kind ID, if it is known.
    pub fn from_id(id: LedgerKindId) -> Option<Self> {
        match id {
            1 => Some(Self::Consume),
            2 => Some(Self::Refund),
            _ => None,
        }
    }
}

/// An immutable audit record of one credit adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: DbId,
    pub username: String,
    pub kind: LedgerKind,
    pub amount: Power,
    /// User balance after the adjustment was applied.
    pub balance_after: Power,
    /// Model tag the adjustment is attributed to.
    pub model: String,
    pub remark: String,
    pub created_at: Timestamp,
}

impl LedgerEntry {
    /// Refund record for an expired or failed job.
    pub fn refund(
        job: &Job,
        username: impl Into<String>,
        balance_after: Power,
        model: impl Into<String>,
    ) -> Self {
        Self {
            user_id: job.user_id,
            username: username.into(),
            kind: LedgerKind::Refund,
            amount: job.power,
            balance_after,
            model: model.into(),
            remark: format!("Task failed, power refunded. Task ID: {}", job.task_id),
            created_at: chrono::Utc::now(),
        }
    }
}
