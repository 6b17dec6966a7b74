//! Metrics and observability for the Sacco Gateway
//!
//! In-process counters and gauges exposed as a JSON snapshot. Guard
//! denials, rate-limiter degradation, and API key lifecycle events all
//! land here; an external collector scrapes the snapshot endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Counter names emitted by the guard chain.
pub mod names {
    pub const DENIED_UNAUTHENTICATED: &str = "auth_denied_unauthenticated";
    pub const DENIED_FORBIDDEN: &str = "auth_denied_forbidden";
    pub const DENIED_MISSING_PARAMETER: &str = "auth_denied_missing_parameter";
    pub const DENIED_RATE_LIMITED: &str = "auth_denied_rate_limited";
    pub const DENIED_UPSTREAM_UNAVAILABLE: &str = "auth_denied_upstream_unavailable";
    pub const RATELIMIT_DEGRADED: &str = "ratelimit_degraded";
    pub const RATELIMIT_FAIL_OPEN: &str = "ratelimit_fail_open";
    pub const APIKEY_ISSUED: &str = "apikey_issued";
    pub const APIKEY_ROTATED: &str = "apikey_rotated";
    pub const APIKEY_REVOKED: &str = "apikey_revoked";
}

/// Global metrics registry
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter
    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value
    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    /// Get a counter value
    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Service uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot all metrics as JSON
    pub async fn snapshot(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let counter_map: HashMap<&str, u64> = counters
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();

        let gauges = self.gauges.read().await;
        let gauge_map: HashMap<&str, u64> = gauges
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();

        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "counters": counter_map,
            "gauges": gauge_map,
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
