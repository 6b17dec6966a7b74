//! In-process counter store
//!
//! Process-lifetime, single-instance counters. Expired records are treated
//! as absent on the next increment (lazy expiry); a periodic sweep purges
//! them to bound memory. Each update happens under one lock acquisition,
//! so concurrent increments on the same key never lose a hit.

use super::{CounterError, CounterStore, RateDecision};
use crate::infra::{spawn_until_shutdown, ShutdownSignal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default sweep interval for expired records.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CounterRecord {
    count: u64,
    expires_at: Instant,
    blocked_until: Option<Instant>,
}

impl CounterRecord {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now + window,
            blocked_until: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now && self.blocked_until.map_or(true, |b| b <= now)
    }
}

/// In-memory counter store. Not suitable for multi-instance deployments;
/// the Redis store exists for that.
pub struct InMemoryCounterStore {
    records: Mutex<HashMap<String, CounterRecord>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Remove expired records; returns how many were purged.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock().expect("counter map poisoned");
        let before = records.len();
        records.retain(|_, record| !record.expired(now));
        before - records.len()
    }

    /// Number of live records, expired or not. Test and metrics hook.
    pub fn len(&self) -> usize {
        self.records.lock().expect("counter map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic sweep as a shutdown-aware background task.
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        signal: ShutdownSignal,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        spawn_until_shutdown(signal, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.sweep_expired();
                if purged > 0 {
                    debug!(purged, "swept expired throttle records");
                }
            }
        })
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn secs_until(deadline: Instant, now: Instant) -> u64 {
    let remaining = deadline.saturating_duration_since(now);
    (remaining.as_millis() as u64).div_ceil(1000)
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
        block_duration: Duration,
    ) -> Result<RateDecision, CounterError> {
        let now = Instant::now();
        let mut records = self.records.lock().expect("counter map poisoned");
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| CounterRecord::fresh(now, window));

        // Penalty box first: once blocked, the key stays blocked until the
        // block elapses, regardless of the window TTL.
        if let Some(blocked_until) = record.blocked_until {
            if blocked_until > now {
                record.count += 1;
                return Ok(RateDecision {
                    total_hits: record.count,
                    window_secs_remaining: secs_until(record.expires_at, now),
                    blocked: true,
                    block_secs_remaining: secs_until(blocked_until, now),
                });
            }
        }

        // Lazy expiry: an expired record is absent.
        if record.expires_at <= now {
            *record = CounterRecord::fresh(now, window);
        }

        record.count += 1;
        let blocked = record.count > limit;

        let block_secs_remaining = if blocked {
            let penalty = if block_duration.is_zero() {
                record.expires_at.saturating_duration_since(now)
            } else {
                block_duration
            };
            let blocked_until = now + penalty;
            record.blocked_until = Some(blocked_until);
            secs_until(blocked_until, now)
        } else {
            record.blocked_until = None;
            0
        };

        Ok(RateDecision {
            total_hits: record.count,
            window_secs_remaining: secs_until(record.expires_at, now),
            blocked,
            block_secs_remaining,
        })
    }

    async fn peek(&self, key: &str) -> Result<u64, CounterError> {
        let now = Instant::now();
        let records = self.records.lock().expect("counter map poisoned");
        Ok(records
            .get(key)
            .filter(|record| !record.expired(now))
            .map(|record| record.count)
            .unwrap_or(0))
    }
}
