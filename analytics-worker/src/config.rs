use std::str::FromStr;
use std::time::Duration;

use analytics_common::DatabaseConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "METRICS_PORT", default = "3001")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(from = "BATCH_SIZE", default = "100")]
    pub batch_size: i64,

    #[envconfig(from = "POLL_INTERVAL_MS", default = "1000")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(from = "MAX_QUEUE_SIZE", default = "10000")]
    pub max_queue_size: i64,

    #[envconfig(from = "SHUTDOWN_GRACE_PERIOD_MS", default = "30000")]
    pub shutdown_grace_period: EnvMsDuration,
}

impl Config {
    /// Produces a host:port address for the `/metrics` listener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `FromStr`-newtype for a millisecond duration, mirroring
/// `hook_worker::config::EnvMsDuration`.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
