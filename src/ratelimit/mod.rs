//! Rate limiting for the Sacco Gateway
//!
//! A [`RateLimiter`] turns an identity key (user, API key, or client IP)
//! plus a window configuration into an allow/deny decision, backed by a
//! [`CounterStore`]. Two stores exist: an in-process map for single
//! instance deployments and tests, and a Redis-backed store shared across
//! gateway instances.
//!
//! Failure policy: if the counter store is entirely unavailable the
//! limiter fails OPEN and records the event. An outage of the rate
//! limiter must never turn into a denial of service.

mod memory;
mod redis;

pub use memory::{InMemoryCounterStore, DEFAULT_SWEEP_INTERVAL};
pub use redis::RedisCounterStore;

use crate::auth::AuthError;
use crate::metrics::{names, MetricsRegistry};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Counter store transport failure.
#[derive(Debug, thiserror::Error)]
#[error("counter store error: {0}")]
pub struct CounterError(pub String);

/// Outcome of one counted hit. Derived per request, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    /// Hits recorded for this key in the current window, including this one.
    pub total_hits: u64,
    /// Seconds until the current window expires.
    pub window_secs_remaining: u64,
    /// Whether the key is over its limit.
    pub blocked: bool,
    /// Seconds until the penalty box opens; zero when not blocked.
    pub block_secs_remaining: u64,
}

impl RateDecision {
    /// Decision used when the limiter fails open.
    pub(crate) fn fail_open() -> Self {
        Self {
            total_hits: 0,
            window_secs_remaining: 0,
            blocked: false,
            block_secs_remaining: 0,
        }
    }
}

/// Key-value counter with TTL and an optional hard block duration.
///
/// `increment` must be atomic per key: two concurrent hits on the same key
/// may never observe the same count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        block_duration: Duration,
    ) -> Result<RateDecision, CounterError>;

    /// Current hit count for a key; zero for absent or expired keys.
    async fn peek(&self, key: &str) -> Result<u64, CounterError>;
}

/// Window configuration.
///
/// `block_duration` governs the penalty box once a key crosses its limit;
/// it is tracked separately from the window TTL. A zero block duration
/// falls back to the remainder of the window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub limit: u64,
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            limit: 120,
            block_duration: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Read `THROTTLE_WINDOW_MS`, `THROTTLE_LIMIT`, and `THROTTLE_BLOCK_MS`
    /// from the environment, with the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let window = std::env::var("THROTTLE_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.window);

        let limit = std::env::var("THROTTLE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.limit);

        let block_duration = std::env::var("THROTTLE_BLOCK_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.block_duration);

        Self {
            window,
            limit,
            block_duration,
        }
    }
}

/// Converts identity keys into allow/deny decisions against a counter store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
    metrics: Arc<MetricsRegistry>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: RateLimitConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Record a hit for `identity` and decide whether to admit it.
    ///
    /// Denials carry a retry-after derived from the penalty box. If the
    /// store fails the limiter allows the request and records the outage.
    pub async fn check(&self, identity: &str) -> Result<RateDecision, AuthError> {
        let key = format!("throttle:{identity}");

        let decision = match self
            .store
            .increment(
                &key,
                self.config.window,
                self.config.limit,
                self.config.block_duration,
            )
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                error!(identity = %identity, error = %e, "counter store unavailable, failing open");
                self.metrics.inc_counter(names::RATELIMIT_FAIL_OPEN).await;
                return Ok(RateDecision::fail_open());
            }
        };

        if decision.blocked {
            warn!(
                identity = %identity,
                total_hits = decision.total_hits,
                "rate limit exceeded"
            );
            self.metrics.inc_counter(names::DENIED_RATE_LIMITED).await;
            return Err(AuthError::RateLimited {
                retry_after_secs: decision.block_secs_remaining.max(1),
            });
        }

        Ok(decision)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment(
            &self,
            _key: &str,
            _window: Duration,
            _limit: u64,
            _block_duration: Duration,
        ) -> Result<RateDecision, CounterError> {
            Err(CounterError("connection refused".into()))
        }

        async fn peek(&self, _key: &str) -> Result<u64, CounterError> {
            Err(CounterError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_limit_then_block() {
        let metrics = Arc::new(MetricsRegistry::new());
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitConfig {
                window: Duration::from_secs(60),
                limit: 5,
                block_duration: Duration::from_secs(30),
            },
            metrics.clone(),
        );

        for expected in 1..=5u64 {
            let decision = limiter.check("X").await.unwrap();
            assert_eq!(decision.total_hits, expected);
            assert!(!decision.blocked);
        }

        match limiter.check("X").await {
            Err(AuthError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(metrics.get_counter(names::DENIED_RATE_LIMITED).await, 1);
    }

    #[tokio::test]
    async fn test_identities_are_isolated() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitConfig {
                window: Duration::from_secs(60),
                limit: 1,
                block_duration: Duration::from_secs(60),
            },
            Arc::new(MetricsRegistry::new()),
        );

        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("b").await.is_ok());
        assert!(limiter.check("a").await.is_err());
        assert!(limiter.check("b").await.is_err());
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let metrics = Arc::new(MetricsRegistry::new());
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            RateLimitConfig::default(),
            metrics.clone(),
        );

        let decision = limiter.check("X").await.unwrap();
        assert!(!decision.blocked);
        assert_eq!(metrics.get_counter(names::RATELIMIT_FAIL_OPEN).await, 1);
    }
}
