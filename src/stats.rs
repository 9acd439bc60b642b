//! Best-effort running statistics, mirrored into the KVStore for an out-of-scope dashboard
//! while also being cheap to read synchronously from within the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::kv_store::KvStore;

#[derive(Default)]
struct Counters {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    redirects_total: AtomicU64,
    capacity_exceeded_total: AtomicU64,
    duration_sum_millis: AtomicI64,
}

/// Local atomics for cheap synchronous reads, mirrored best-effort into the KVStore under
/// documented keys (`HINCRBY`/`HINCRBYFLOAT`) so a dashboard reading the shared store sees
/// roughly the same numbers without this process being the source of truth.
pub struct Stats {
    counters: Counters,
    store: Option<Arc<dyn KvStore>>,
}

const STATS_KEY: &str = "stats:totals";

impl Stats {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self { counters: Counters::default(), store }
    }

    pub async fn record_request(&self, duration: std::time::Duration) {
        self.counters.requests_total.fetch_add(1, Ordering::Relaxed);
        self.counters.duration_sum_millis.fetch_add(duration.as_millis() as i64, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store.hset(STATS_KEY, "requests_total", &self.requests_total().to_string()).await;
        }
    }

    pub async fn record_error(&self) {
        self.counters.errors_total.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store.hset(STATS_KEY, "errors_total", &self.errors_total().to_string()).await;
        }
    }

    pub async fn record_redirect(&self) {
        self.counters.redirects_total.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store.hset(STATS_KEY, "redirects_total", &self.redirects_total().to_string()).await;
        }
    }

    pub async fn record_capacity_exceeded(&self) {
        self.counters.capacity_exceeded_total.fetch_add(1, Ordering::Relaxed);
        if let Some(store) = &self.store {
            store
                .hset(STATS_KEY, "capacity_exceeded_total", &self.capacity_exceeded_total().to_string())
                .await;
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.counters.requests_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.counters.errors_total.load(Ordering::Relaxed)
    }

    pub fn redirects_total(&self) -> u64 {
        self.counters.redirects_total.load(Ordering::Relaxed)
    }

    pub fn capacity_exceeded_total(&self) -> u64 {
        self.counters.capacity_exceeded_total.load(Ordering::Relaxed)
    }

    pub fn duration_sum(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.counters.duration_sum_millis.load(Ordering::Relaxed).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate_independently() {
        let stats = Stats::new(None);
        stats.record_request(std::time::Duration::from_millis(100)).await;
        stats.record_request(std::time::Duration::from_millis(50)).await;
        stats.record_error().await;
        stats.record_redirect().await;
        stats.record_capacity_exceeded().await;

        assert_eq!(stats.requests_total(), 2);
        assert_eq!(stats.errors_total(), 1);
        assert_eq!(stats.redirects_total(), 1);
        assert_eq!(stats.capacity_exceeded_total(), 1);
        assert_eq!(stats.duration_sum(), std::time::Duration::from_millis(150));
    }

    #[tokio::test]
    async fn mirrors_into_kv_store_when_configured() {
        let store: Arc<dyn KvStore> = Arc::new(crate::kv_store::InMemoryKvStore::new());
        let stats = Stats::new(Some(store.clone()));
        stats.record_request(std::time::Duration::from_millis(10)).await;
        assert_eq!(store.hget(STATS_KEY, "requests_total").await, Some("1".to_string()));
    }
}
