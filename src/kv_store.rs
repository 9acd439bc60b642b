//! Abstract key-value store interface used by the [`crate::task_monitor::TaskMonitor`], plus
//! an in-process reference implementation suitable for tests and single-process deployments.
//!
//! A production deployment is expected to back this with Redis (or a similar store) so the
//! inflight registry is shared across processes; [`InMemoryKvStore`] implements the same
//! contract with a `DashMap`-backed single critical section standing in for what a real
//! backend would ship as a Lua `EVAL` script.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::time_helper::now_ms;

/// Outcome of the atomic check-and-remove used by orphan cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovedEntry {
    NotOrphaned,
    Removed { job_json: String },
}

/// The KVStore operations the engine needs: a sorted set, a hash, a set, `SET NX EX`
/// string keys, and one server-side atomic script (`check_and_remove_if_stale`).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn zadd(&self, key: &str, member: &str, score: i64);
    async fn zadd_xx(&self, key: &str, member: &str, score: i64);
    async fn zrem(&self, key: &str, member: &str);
    async fn zscore(&self, key: &str, member: &str) -> Option<i64>;
    /// Members with score strictly less than `max_score`.
    async fn zrangebyscore_lt(&self, key: &str, max_score: i64) -> Vec<String>;
    async fn expire(&self, key: &str, ttl_ms: i64);

    async fn hset(&self, key: &str, field: &str, value: &str);
    async fn hget(&self, key: &str, field: &str) -> Option<String>;
    async fn hdel(&self, key: &str, field: &str);

    async fn sadd(&self, key: &str, member: &str);
    async fn sismember(&self, key: &str, member: &str) -> bool;

    /// `SET key value NX EX ttl_secs`. Returns true iff the key was newly set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool;
    /// Returns the current value, if present and unexpired.
    async fn get(&self, key: &str) -> Option<String>;
    /// Deletes `key` only if its current value equals `expected` (optimistic lock release).
    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool;

    /// Atomic check-and-remove used by orphan cleanup: if `zscore(index_key, task_id)` is
    /// absent or `>= threshold_ms`, returns `NotOrphaned`; otherwise removes the entry from
    /// both the index and the jobs hash and returns its job JSON.
    async fn check_and_remove_if_stale(
        &self,
        index_key: &str,
        jobs_key: &str,
        task_id: &str,
        threshold_ms: i64,
    ) -> RemovedEntry;
}

#[derive(Default)]
struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at_ms {
            Some(exp) => now_ms() < exp,
            None => true,
        }
    }
}

/// A single-process `KvStore` backed by `DashMap`s guarded by one `Mutex` for the operations
/// that must be atomic across maps (`check_and_remove_if_stale`, `set_nx_ex`,
/// `compare_and_delete`). Expiry is evaluated lazily on read, matching Redis's "expired keys
/// disappear on access" behaviour closely enough for tests.
pub struct InMemoryKvStore {
    sorted_sets: DashMap<String, BTreeMap<String, i64>>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
    strings: DashMap<String, Entry>,
    lock: Arc<Mutex<()>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            sorted_sets: DashMap::new(),
            hashes: DashMap::new(),
            sets: DashMap::new(),
            strings: DashMap::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn zadd(&self, key: &str, member: &str, score: i64) {
        self.sorted_sets.entry(key.to_string()).or_default().insert(member.to_string(), score);
    }

    async fn zadd_xx(&self, key: &str, member: &str, score: i64) {
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            if let Some(existing) = set.get_mut(member) {
                *existing = score;
            }
        }
    }

    async fn zrem(&self, key: &str, member: &str) {
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            set.remove(member);
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.sorted_sets.get(key).and_then(|set| set.get(member).copied())
    }

    async fn zrangebyscore_lt(&self, key: &str, max_score: i64) -> Vec<String> {
        self.sorted_sets
            .get(key)
            .map(|set| set.iter().filter(|&(_, &score)| score < max_score).map(|(m, _)| m.clone()).collect())
            .unwrap_or_default()
    }

    async fn expire(&self, _key: &str, _ttl_ms: i64) {
        // Sorted sets and hashes in the reference store never expire on their own; TTL
        // enforcement is only meaningful for a shared backend, where it protects against a
        // crashed process leaking entries forever. Single-process tests don't need it.
    }

    async fn hset(&self, key: &str, field: &str, value: &str) {
        self.hashes.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
    }

    async fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.hashes.get(key).and_then(|h| h.get(field).cloned())
    }

    async fn hdel(&self, key: &str, field: &str) {
        if let Some(mut h) = self.hashes.get_mut(key) {
            h.remove(field);
        }
    }

    async fn sadd(&self, key: &str, member: &str) {
        self.sets.entry(key.to_string()).or_default().insert(member.to_string());
    }

    async fn sismember(&self, key: &str, member: &str) -> bool {
        self.sets.get(key).map(|s| s.contains(member)).unwrap_or(false)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let _guard = self.lock.lock();
        let live = self.strings.get(key).map(|e| e.is_live()).unwrap_or(false);
        if live {
            return false;
        }
        self.strings.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at_ms: Some(now_ms() + ttl_secs as i64 * 1000) },
        );
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.strings.get(key).filter(|e| e.is_live()).map(|e| e.value.clone())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let _guard = self.lock.lock();
        let matches = self.strings.get(key).filter(|e| e.is_live()).map(|e| e.value == expected).unwrap_or(false);
        if matches {
            self.strings.remove(key);
        }
        matches
    }

    async fn check_and_remove_if_stale(
        &self,
        index_key: &str,
        jobs_key: &str,
        task_id: &str,
        threshold_ms: i64,
    ) -> RemovedEntry {
        let _guard = self.lock.lock();
        let score = self.sorted_sets.get(index_key).and_then(|set| set.get(task_id).copied());
        match score {
            None => RemovedEntry::NotOrphaned,
            Some(s) if s >= threshold_ms => RemovedEntry::NotOrphaned,
            Some(_) => {
                let job_json = self.hashes.get(jobs_key).and_then(|h| h.get(task_id).cloned());
                if let Some(mut set) = self.sorted_sets.get_mut(index_key) {
                    set.remove(task_id);
                }
                if let Some(mut h) = self.hashes.get_mut(jobs_key) {
                    h.remove(task_id);
                }
                match job_json {
                    Some(job_json) => RemovedEntry::Removed { job_json },
                    None => RemovedEntry::NotOrphaned,
                }
            }
        }
    }
}
