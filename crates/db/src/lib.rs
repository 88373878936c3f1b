//! PostgreSQL persistence for the task queue, jobs, user balances and the
//! power ledger.
//!
//! Repositories are zero-sized structs with async methods taking `&PgPool`.
//! [`store::PgJobStore`] and [`store::PgCreditLedger`] adapt them to the
//! `sdpool_core` store traits, and [`task_queue::PgTaskQueue`] to its
//! queue trait.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod store;
pub mod task_queue;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
