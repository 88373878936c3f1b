//! Balance operations on the `users` table.

use sdpool_core::types::{DbId, Power};
use sqlx::PgPool;

use crate::models::user::UserBalance;

/// Provides balance reads and atomic credits.
pub struct UserRepo;

impl UserRepo {
    /// Atomically add `amount` to a user's power balance.
    ///
    /// Returns the updated balance, or `None` if no user has that id.
    pub async fn credit_power(
        pool: &PgPool,
        user_id: DbId,
        amount: Power,
    ) -> Result<Option<UserBalance>, sqlx::Error> {
        sqlx::query_as::<_, UserBalance>(
            "UPDATE users SET power = power + $2 WHERE id = $1 \
             RETURNING id, username, power",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(pool)
        .await
    }

    /// Read a user's balance.
    pub async fn find_balance(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<UserBalance>, sqlx::Error> {
        sqlx::query_as::<_, UserBalance>("SELECT id, username, power FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}
