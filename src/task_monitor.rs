//! Durable inflight record for crash recovery, coordinated across processes through the
//! shared [`KvStore`].

use std::sync::Arc;

use crate::kv_store::{KvStore, RemovedEntry};
use crate::process_identity::ProcessIdentity;
use crate::request::{JobHash, RequestTask};
use crate::time_helper::now_ms;

const INFLIGHT_INDEX: &str = "inflight_index";
const INFLIGHT_JOBS: &str = "inflight_jobs";
const PROCESSES: &str = "processes";
const GC_LOCK: &str = "gc_lock";

pub struct TaskMonitor {
    store: Arc<dyn KvStore>,
    identity: ProcessIdentity,
    orphan_threshold_ms: i64,
}

impl TaskMonitor {
    pub fn new(store: Arc<dyn KvStore>, identity: ProcessIdentity, orphan_threshold_ms: i64) -> Self {
        Self { store, identity, orphan_threshold_ms }
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Registers a task as inflight: index entry, job blob, both with a TTL generous enough
    /// that a slow orphan sweep can never outrun it.
    pub async fn register(&self, task: &RequestTask) -> anyhow::Result<()> {
        let task_id = task.task_id();
        let now = now_ms();
        self.store.zadd(INFLIGHT_INDEX, &task_id, now).await;
        let job_json = serde_json::to_string(&task.job)?;
        self.store.hset(INFLIGHT_JOBS, &task_id, &job_json).await;
        let ttl_ms = (self.orphan_threshold_ms * 3).max(3_600_000);
        self.store.expire(INFLIGHT_INDEX, ttl_ms).await;
        self.store.expire(INFLIGHT_JOBS, ttl_ms).await;
        tracing::debug!(task_id, "registered inflight task");
        Ok(())
    }

    /// Removes a task from the inflight registry after its callback has been durably enqueued.
    pub async fn unregister(&self, task: &RequestTask) {
        let task_id = task.task_id();
        self.store.zrem(INFLIGHT_INDEX, &task_id).await;
        self.store.hdel(INFLIGHT_JOBS, &task_id).await;
        tracing::debug!(task_id, "unregistered inflight task");
    }

    /// Pipelined `ZADD XX` heartbeat refresh for every id currently inflight in this process.
    pub async fn update_heartbeats(&self, task_ids: &[String]) {
        let now = now_ms();
        for id in task_ids {
            self.store.zadd_xx(INFLIGHT_INDEX, id, now).await;
        }
    }

    /// Announces this process as alive and (re)sets its advertised capacity key.
    pub async fn ping_process(&self, max_connections: usize, ttl_secs: u64) {
        self.store.sadd(PROCESSES, self.identity.as_str()).await;
        let key = format!("processes:{}:max_connections", self.identity.as_str());
        self.store.set_nx_ex(&key, &max_connections.to_string(), ttl_secs).await;
    }

    /// `SET gc_lock self NX EX ttl`. Returns true only if this call acquired the lock.
    pub async fn acquire_gc_lock(&self, ttl_secs: u64) -> bool {
        self.store.set_nx_ex(GC_LOCK, self.identity.as_str(), ttl_secs).await
    }

    /// Releases the lock only if we still hold it (optimistic compare-and-delete).
    pub async fn release_gc_lock(&self) -> bool {
        self.store.compare_and_delete(GC_LOCK, self.identity.as_str()).await
    }

    /// Finds task ids whose heartbeat is older than `threshold_s` seconds, excludes any whose
    /// owning process is still alive, and atomically removes the rest, pushing their original
    /// job back to `broker`.
    pub async fn cleanup_orphaned_requests(
        &self,
        threshold_s: i64,
        broker: &(dyn crate::job_broker::JobBroker),
    ) -> anyhow::Result<usize> {
        let cutoff = now_ms() - threshold_s * 1000;
        let candidates = self.store.zrangebyscore_lt(INFLIGHT_INDEX, cutoff).await;
        let mut recovered = 0usize;

        for task_id in candidates {
            let process_prefix = ProcessIdentity::prefix_of(&task_id);
            if self.store.sismember(PROCESSES, process_prefix).await {
                continue;
            }

            match self.store.check_and_remove_if_stale(INFLIGHT_INDEX, INFLIGHT_JOBS, &task_id, cutoff).await {
                RemovedEntry::NotOrphaned => continue,
                RemovedEntry::Removed { job_json } => match serde_json::from_str::<JobHash>(&job_json) {
                    Ok(job) => {
                        if let Err(e) = broker.push(job).await {
                            tracing::error!(task_id, error = %e, "failed to re-enqueue orphaned job");
                            continue;
                        }
                        tracing::info!(task_id, "recovered orphaned task");
                        recovered += 1;
                    }
                    Err(e) => {
                        tracing::error!(task_id, error = %e, "orphaned job payload was not valid JSON");
                    }
                },
            }
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_broker::InMemoryJobBroker;
    use crate::kv_store::InMemoryKvStore;
    use crate::request::{JobHash, RequestTask};
    use crate::headers::HttpHeaders;
    use crate::request::{Method, Request};
    use std::time::Duration;

    fn identity(suffix: &str) -> ProcessIdentity {
        ProcessIdentity::current_for_test(suffix)
    }

    fn sample_task(correlation_id: &str) -> RequestTask {
        let req = Request::new(
            Method::Get,
            "https://example.com",
            HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        RequestTask::new(
            correlation_id.to_string(),
            req,
            JobHash { class: "Job".into(), args: vec![] },
            "Cb".into(),
            serde_json::Map::new(),
            false,
        )
    }

    #[tokio::test]
    async fn register_then_unregister_round_trips() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let monitor = TaskMonitor::new(store.clone(), identity("a"), 60_000);
        let task = sample_task("t1");
        monitor.register(&task).await.unwrap();
        assert!(store.zscore("inflight_index", "t1").await.is_some());
        monitor.unregister(&task).await;
        assert!(store.zscore("inflight_index", "t1").await.is_none());
        assert!(store.hget("inflight_jobs", "t1").await.is_none());
    }

    #[tokio::test]
    async fn gc_lock_is_exclusive() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let a = TaskMonitor::new(store.clone(), identity("a"), 60_000);
        let b = TaskMonitor::new(store.clone(), identity("b"), 60_000);
        assert!(a.acquire_gc_lock(60).await);
        assert!(!b.acquire_gc_lock(60).await);
        assert!(a.release_gc_lock().await);
        assert!(b.acquire_gc_lock(60).await);
    }

    #[tokio::test]
    async fn orphan_with_live_process_is_not_recovered() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let owner = identity("owner");
        let monitor = TaskMonitor::new(store.clone(), owner.clone(), 1);
        let task = sample_task("t1");
        monitor.register(&task).await.unwrap();
        store.zadd("inflight_index", &task.task_id(), now_ms() - 10_000).await;
        monitor.ping_process(4, 60).await;

        let broker = InMemoryJobBroker::new();
        let recovered = monitor.cleanup_orphaned_requests(0, &broker).await.unwrap();
        assert_eq!(recovered, 0);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn orphan_with_dead_process_is_recovered_exactly_once() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let dead_owner = identity("dead");
        let monitor_dead = TaskMonitor::new(store.clone(), dead_owner.clone(), 1);
        let task = sample_task("t1");
        monitor_dead.register(&task).await.unwrap();
        store.zadd("inflight_index", &task.task_id(), now_ms() - 10_000).await;

        let recoverer = TaskMonitor::new(store.clone(), identity("alive"), 1);
        let broker = InMemoryJobBroker::new();
        let recovered = recoverer.cleanup_orphaned_requests(0, &broker).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(broker.len(), 1);

        let recovered_again = recoverer.cleanup_orphaned_requests(0, &broker).await.unwrap();
        assert_eq!(recovered_again, 0);
    }
}
