use std::sync::Arc;
use std::time::Instant;

use analytics_queue::EventQueue;
use analytics_stats::StatsLayer;
use health::HealthRegistry;
use sqlx::postgres::PgPool;

use crate::config::Config;
use crate::rate_limit::{CrossInstanceLimiter, InProcessLimiter};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queue: Arc<EventQueue>,
    pub stats: Arc<StatsLayer>,
    pub health: HealthRegistry,
    pub in_process_limiter: InProcessLimiter,
    pub cross_instance_limiter: Arc<CrossInstanceLimiter>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pool: PgPool, health: HealthRegistry, config: Config) -> Self {
        let queue = Arc::new(EventQueue::new(pool.clone(), config.max_queue_size));
        let stats = Arc::new(StatsLayer::new(pool.clone(), config.cache_ttl_seconds));
        let in_process_limiter =
            InProcessLimiter::new(config.rate_limit_per_minute, config.rate_limit_burst);
        let cross_instance_limiter = Arc::new(CrossInstanceLimiter::new(
            pool.clone(),
            config.rate_limit_per_minute,
            config.rate_limit_strikes_before_ban,
            config.rate_limit_ban_seconds,
        ));

        Self {
            pool,
            queue,
            stats,
            health,
            in_process_limiter,
            cross_instance_limiter,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
