//! Connection pool and embedded migrations.

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::DbError;

pub type DbPool = PgPool;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `database_url` with at most `max_connections` open at once.
///
/// Acquiring a connection gives up after five seconds so a saturated pool
/// surfaces as a transient [`DbError`] instead of stalling a run.
#[instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    info!("database pool ready");
    Ok(pool)
}

/// Apply the workflow, run and invoice-line schema.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!(known = MIGRATOR.iter().count(), "applying migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}
