use std::time::Duration;

use envconfig::Envconfig;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connection pool configuration shared by every component that talks to
/// the raw/aggregate/queue store.
#[derive(Envconfig, Clone)]
pub struct DatabaseConfig {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "POOL_MAX_CONNECTIONS", default = "20")]
    pub pool_max_connections: u32,

    #[envconfig(from = "POOL_IDLE_TIMEOUT_MS", default = "30000")]
    pub pool_idle_timeout_ms: u64,
}

impl DatabaseConfig {
    pub async fn create_pool(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.pool_max_connections)
            .idle_timeout(Duration::from_millis(self.pool_idle_timeout_ms))
            .connect(&self.database_url)
            .await
    }
}
