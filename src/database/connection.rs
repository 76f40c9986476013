use crate::config::loader::mask_database_url;
use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

/// Pooled PostgreSQL connection shared by the job store and queue gateway
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            database_url = %mask_database_url(&config.url),
            max_connections = config.max_connections,
            "🔌 Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        health_check(&self.pool).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// `SELECT 1` round-trip
pub async fn health_check(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 AS health").fetch_one(pool).await?;
    let health: i32 = row.get("health");
    Ok(health == 1)
}
