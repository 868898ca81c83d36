use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{BillingError, BillingResult};

/// Opens the connection pool and applies pending migrations.
pub async fn connect(config: &AppConfig, database_url: &str) -> BillingResult<PgPool> {
    info!(
        max_connections = config.db_pool_max_connections,
        min_connections = config.db_pool_min_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds.max(1)))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect(database_url)
        .await
        .map_err(|error| BillingError::Dependency(format!("Database connection failed: {error}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|error| BillingError::Dependency(format!("Database migration failed: {error}")))?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}
