use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{Result, SettingsError};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Build the connection pool. The acquire timeout bounds every durable call.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let database_url = config.database_url().ok_or_else(|| {
        SettingsError::Configuration("database.url or DATABASE_URL must be set".to_string())
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&database_url)
        .await
        .map_err(|e| SettingsError::DurableStoreUnavailable(e.to_string()))?;

    info!(
        max_connections = config.max_connections,
        acquire_timeout_seconds = config.acquire_timeout_seconds,
        "🐘 Durable store pool connected"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> std::result::Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 as health").fetch_one(pool).await?;
    let health: i32 = row.get("health");
    Ok(health == 1)
}
