use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod donors;
pub mod events;
pub mod history;
pub mod models;
pub mod tags;
pub mod users;

pub type DbPool = PgPool;

/// Build the shared connection pool.
///
/// The pool is the single persistence handle for the whole process; it is
/// created here once and passed down through `AppState` rather than held in
/// module-level state.
pub async fn init_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        // Tolerate transient connectivity delays on cold starts.
        .acquire_timeout(Duration::from_secs(60))
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {}", e))?;

    Ok(pool)
}
