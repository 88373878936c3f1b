//! Repository for the append-only `power_logs` table.

use sdpool_core::types::DbId;
use sqlx::PgPool;

use crate::models::power_log::{CreatePowerLog, PowerLog};

/// Column list for `power_logs` queries.
const COLUMNS: &str = "id, user_id, username, kind_id, amount, balance, model, remark, created_at";

/// Maximum page size for ledger listing.
const MAX_LIMIT: i64 = 100;

/// Provides append and read access to the power ledger.
pub struct PowerLogRepo;

impl PowerLogRepo {
    /// Append a ledger row.
    pub async fn create(pool: &PgPool, input: &CreatePowerLog<'_>) -> Result<PowerLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO power_logs \
                 (user_id, username, kind_id, amount, balance, model, remark, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PowerLog>(&query)
            .bind(input.user_id)
            .bind(input.username)
            .bind(input.kind_id)
            .bind(input.amount)
            .bind(input.balance)
            .bind(input.model)
            .bind(input.remark)
            .bind(input.created_at)
            .fetch_one(pool)
            .await
    }

    /// Most recent ledger rows for a user, newest first.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<PowerLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM power_logs WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        sqlx::query_as::<_, PowerLog>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }
}
