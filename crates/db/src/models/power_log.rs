//! Row model and insert DTO for the `power_logs` table.

use sdpool_core::ledger::{LedgerEntry, LedgerKindId};
use sdpool_core::types::{DbId, Power, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `power_logs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PowerLog {
    pub id: DbId,
    pub user_id: DbId,
    pub username: String,
    pub kind_id: LedgerKindId,
    pub amount: Power,
    pub balance: Power,
    pub model: String,
    pub remark: String,
    pub created_at: Timestamp,
}

/// DTO for appending a ledger entry.
#[derive(Debug, Clone)]
pub struct CreatePowerLog<'a> {
    pub user_id: DbId,
    pub username: &'a str,
    pub kind_id: LedgerKindId,
    pub amount: Power,
    pub balance: Power,
    pub model: &'a str,
    pub remark: &'a str,
    pub created_at: Timestamp,
}

impl<'a> From<&'a LedgerEntry> for CreatePowerLog<'a> {
    fn from(entry: &'a LedgerEntry) -> Self {
        Self {
            user_id: entry.user_id,
            username: &entry.username,
            kind_id: entry.kind.id(),
            amount: entry.amount,
            balance: entry.balance_after,
            model: &entry.model,
            remark: &entry.remark,
            created_at: entry.created_at,
        }
    }
}
