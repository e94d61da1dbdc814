use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::config::DatabaseConfig;

/// Total connection attempts before giving up.
const CONNECT_ATTEMPTS: usize = 5;
/// Fixed spacing between attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Create the connection pool, retrying on a fixed interval. This is the
/// only retry loop in the system; exhaustion is fatal to the caller.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let url = config.connection_url();
    let strategy = FixedInterval::new(CONNECT_RETRY_DELAY).take(CONNECT_ATTEMPTS - 1);

    let mut attempt = 0usize;
    Retry::spawn(strategy, || {
        attempt += 1;
        if attempt > 1 {
            tracing::warn!(attempt, max = CONNECT_ATTEMPTS, "retrying database connection");
        }
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
    })
    .await
}

/// Apply pending migrations once at boot. Nothing pending is success;
/// any other failure must abort startup before serving.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}
