//! Redis-backed counter store
//!
//! Shared across gateway instances; Redis is the source of truth while it
//! is reachable because `INCR` + `PEXPIRE` run as one atomic pipeline and
//! increments commute. On transport failure the store degrades to an
//! embedded in-memory store and records the degradation. Counters taken
//! during degradation are not synchronized with other instances; the
//! window closes once Redis is reachable again.

use super::{CounterError, CounterStore, InMemoryCounterStore, RateDecision};
use crate::metrics::{names, MetricsRegistry};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct RedisCounterStore {
    manager: ConnectionManager,
    fallback: Arc<InMemoryCounterStore>,
    metrics: Arc<MetricsRegistry>,
}

impl RedisCounterStore {
    /// Connect to Redis. The fallback store is shared with the server so
    /// its sweeper also covers records taken during degradation. Callers
    /// use the fallback alone when this fails at startup.
    pub async fn connect(
        url: &str,
        fallback: Arc<InMemoryCounterStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, CounterError> {
        let client = redis::Client::open(url)
            .map_err(|e| CounterError(format!("redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterError(format!("redis connect: {e}")))?;

        Ok(Self {
            manager,
            fallback,
            metrics,
        })
    }

    async fn degraded(&self, op: &str, err: redis::RedisError) {
        warn!(op, error = %err, "redis counter store degraded, using in-memory fallback");
        self.metrics.inc_counter(names::RATELIMIT_DEGRADED).await;
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    (duration.as_millis() as u64).div_ceil(1000)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        block_duration: Duration,
    ) -> Result<RateDecision, CounterError> {
        let mut conn = self.manager.clone();
        let window_ms = window.as_millis() as i64;

        let result: Result<(u64,), redis::RedisError> = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore()
            .query_async(&mut conn)
            .await;

        let count = match result {
            Ok((count,)) => count,
            Err(e) => {
                self.degraded("increment", e).await;
                return self
                    .fallback
                    .increment(key, window, limit, block_duration)
                    .await;
            }
        };

        let blocked = count > limit;
        let penalty = if block_duration.is_zero() {
            window
        } else {
            block_duration
        };

        Ok(RateDecision {
            total_hits: count,
            window_secs_remaining: ceil_secs(window),
            blocked,
            block_secs_remaining: if blocked { ceil_secs(penalty) } else { 0 },
        })
    }

    async fn peek(&self, key: &str) -> Result<u64, CounterError> {
        let mut conn = self.manager.clone();
        let result: Result<Option<u64>, redis::RedisError> = conn.get(key).await;

        match result {
            Ok(value) => Ok(value.unwrap_or(0)),
            Err(e) => {
                self.degraded("peek", e).await;
                self.fallback.peek(key).await
            }
        }
    }
}
