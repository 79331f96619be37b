//! Two-layer rate limiting. An in-process `governor` limiter shapes bursts
//! cheaply without a round-trip; the authoritative decision is a
//! Postgres fixed-window counter so horizontally-scaled instances share
//! one per-client budget. Three consecutive window violations escalate
//! to a timed ban, grounded on `capture::partition_limits::PartitionLimiter`
//! for the in-process half.

use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use sqlx::postgres::PgPool;

pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
    Banned { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct InProcessLimiter {
    limiter: Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>,
}

impl InProcessLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
        }
    }

    pub fn is_limited(&self, client_key: &str) -> bool {
        self.limiter.check_key(&client_key.to_string()).is_err()
    }
}

pub struct CrossInstanceLimiter {
    pool: PgPool,
    limit_per_minute: i32,
    strikes_before_ban: i32,
    ban: Duration,
}

impl CrossInstanceLimiter {
    pub fn new(pool: PgPool, limit_per_minute: u32, strikes_before_ban: u32, ban_seconds: i64) -> Self {
        Self {
            pool,
            limit_per_minute: limit_per_minute as i32,
            strikes_before_ban: strikes_before_ban as i32,
            ban: Duration::seconds(ban_seconds),
        }
    }

    /// Atomically checks and increments the fixed window for `client_key`.
    /// Locks the client's row (or inserts it) inside one transaction so
    /// concurrent requests from the same client across instances serialize
    /// on the same counter.
    pub async fn check(&self, client_key: &str) -> Result<RateLimitDecision, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(DateTime<Utc>, i32, i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT window_start, count, strikes, banned_until FROM client_rate_limits WHERE client_key = $1 FOR UPDATE",
        )
        .bind(client_key)
        .fetch_optional(&mut *tx)
        .await?;

        let decision = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO client_rate_limits (client_key, window_start, count, strikes) VALUES ($1, $2, 1, 0)",
                )
                .bind(client_key)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                RateLimitDecision::Allowed
            }
            Some((window_start, count, strikes, banned_until)) => {
                if let Some(banned_until) = banned_until {
                    if banned_until > now {
                        tx.rollback().await?;
                        return Ok(RateLimitDecision::Banned {
                            retry_after_secs: (banned_until - now).num_seconds().max(1) as u64,
                        });
                    }
                }

                if now - window_start >= Duration::minutes(1) {
                    sqlx::query(
                        "UPDATE client_rate_limits SET window_start = $2, count = 1, strikes = 0, banned_until = NULL WHERE client_key = $1",
                    )
                    .bind(client_key)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    RateLimitDecision::Allowed
                } else if count + 1 > self.limit_per_minute {
                    let new_strikes = strikes + 1;
                    if new_strikes >= self.strikes_before_ban {
                        let banned_until = now + self.ban;
                        sqlx::query(
                            "UPDATE client_rate_limits SET strikes = $2, banned_until = $3 WHERE client_key = $1",
                        )
                        .bind(client_key)
                        .bind(new_strikes)
                        .bind(banned_until)
                        .execute(&mut *tx)
                        .await?;
                        RateLimitDecision::Banned {
                            retry_after_secs: self.ban.num_seconds().max(1) as u64,
                        }
                    } else {
                        sqlx::query("UPDATE client_rate_limits SET strikes = $2 WHERE client_key = $1")
                            .bind(client_key)
                            .bind(new_strikes)
                            .execute(&mut *tx)
                            .await?;
                        let retry_after = (window_start + Duration::minutes(1) - now).num_seconds().max(1);
                        RateLimitDecision::Limited {
                            retry_after_secs: retry_after as u64,
                        }
                    }
                } else {
                    sqlx::query("UPDATE client_rate_limits SET count = count + 1 WHERE client_key = $1")
                        .bind(client_key)
                        .execute(&mut *tx)
                        .await?;
                    RateLimitDecision::Allowed
                }
            }
        };

        tx.commit().await?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_process_limiter_allows_burst_then_limits() {
        let limiter = InProcessLimiter::new(60, 2);
        let key = "client-a";
        assert!(!limiter.is_limited(key));
        assert!(!limiter.is_limited(key));
        assert!(limiter.is_limited(key));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn cross_instance_limiter_allows_first_requests_then_limits(pool: PgPool) {
        let limiter = CrossInstanceLimiter::new(pool, 2, 3, 60);
        let key = "client-b";
        assert!(matches!(limiter.check(key).await.unwrap(), RateLimitDecision::Allowed));
        assert!(matches!(limiter.check(key).await.unwrap(), RateLimitDecision::Allowed));
        assert!(matches!(
            limiter.check(key).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn repeated_violations_escalate_to_a_ban(pool: PgPool) {
        let limiter = CrossInstanceLimiter::new(pool, 1, 2, 60);
        let key = "client-c";
        assert!(matches!(limiter.check(key).await.unwrap(), RateLimitDecision::Allowed));
        assert!(matches!(
            limiter.check(key).await.unwrap(),
            RateLimitDecision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check(key).await.unwrap(),
            RateLimitDecision::Banned { .. }
        ));
    }
}
