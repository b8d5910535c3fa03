use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Creates a PostgreSQL connection pool.
///
/// The pool connects lazily so a database that is down at boot degrades the
/// conversation flow instead of blocking startup.
pub fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Configuring PostgreSQL pool...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(3))
        .connect_lazy(database_url)?;

    info!("PostgreSQL connection pool configured");
    Ok(pool)
}
