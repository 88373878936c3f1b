//! Balance projection of the `users` table.

use sdpool_core::types::{DbId, Power};
use serde::Serialize;
use sqlx::FromRow;

/// The columns of `users` this crate reads.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserBalance {
    pub id: DbId,
    pub username: String,
    pub power: Power,
}
