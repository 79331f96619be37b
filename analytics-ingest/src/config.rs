use std::str::FromStr;

use analytics_common::DatabaseConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "3000")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(from = "MAX_QUEUE_SIZE", default = "10000")]
    pub max_queue_size: i64,

    #[envconfig(from = "BODY_LIMIT_BYTES", default = "102400")]
    pub body_limit_bytes: usize,

    #[envconfig(from = "MAX_BATCH_SIZE", default = "100")]
    pub max_batch_size: usize,

    #[envconfig(from = "RATE_LIMIT_PER_MINUTE", default = "60")]
    pub rate_limit_per_minute: u32,

    #[envconfig(from = "RATE_LIMIT_BURST", default = "10")]
    pub rate_limit_burst: u32,

    #[envconfig(from = "RATE_LIMIT_STRIKES_BEFORE_BAN", default = "3")]
    pub rate_limit_strikes_before_ban: u32,

    #[envconfig(from = "RATE_LIMIT_BAN_SECONDS", default = "600")]
    pub rate_limit_ban_seconds: i64,

    #[envconfig(from = "CACHE_TTL_SECONDS", default = "300")]
    pub cache_ttl_seconds: u64,

    #[envconfig(from = "CORS_ORIGIN", default = "")]
    pub cors_origin: CommaSeparated,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "5000")]
    pub request_timeout_ms: u64,

    #[envconfig(from = "ENVIRONMENT", default = "production")]
    pub environment: String,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database: DatabaseConfig {
                database_url: String::new(),
                pool_max_connections: 5,
                pool_idle_timeout_ms: 30_000,
            },
            max_queue_size: 10_000,
            body_limit_bytes: 102_400,
            max_batch_size: 100,
            rate_limit_per_minute: 60,
            rate_limit_burst: 10,
            rate_limit_strikes_before_ban: 3,
            rate_limit_ban_seconds: 600,
            cache_ttl_seconds: 300,
            cors_origin: CommaSeparated(Vec::new()),
            request_timeout_ms: 5_000,
            environment: "test".to_string(),
        }
    }
}

/// `FromStr`-newtype for a comma-separated list of CORS origins, mirroring
/// the `EnvMsDuration`/`NonEmptyString` idiom in `hook-worker::config`.
#[derive(Debug, Clone)]
pub struct CommaSeparated(pub Vec<String>);

impl FromStr for CommaSeparated {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CommaSeparated(
            s.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }
}
