//! Background loop that keeps heartbeats fresh and periodically performs orphan recovery,
//! running alongside the Processor's reactor task for the engine's lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::job_broker::JobBroker;
use crate::task_monitor::TaskMonitor;

/// Floor for the `gc_lock` TTL; the effective TTL is `max(2 × heartbeat_interval, this)`, so a
/// large `heartbeat_interval` configuration cannot let the lock expire mid-sweep.
const GC_LOCK_MIN_TTL_SECS: u64 = 120;

/// Drives `TaskMonitor`'s heartbeat and orphan-cleanup cycle on an interval of
/// `heartbeat_interval/2`, capped at 5s.
pub struct MonitorThread {
    monitor: Arc<TaskMonitor>,
    broker: Arc<dyn JobBroker>,
    heartbeat_interval: Duration,
    orphan_threshold: Duration,
    max_connections: usize,
    stop: Arc<Notify>,
}

impl MonitorThread {
    pub fn new(
        monitor: Arc<TaskMonitor>,
        broker: Arc<dyn JobBroker>,
        heartbeat_interval: Duration,
        orphan_threshold: Duration,
        max_connections: usize,
    ) -> Self {
        Self { monitor, broker, heartbeat_interval, orphan_threshold, max_connections, stop: Arc::new(Notify::new()) }
    }

    fn tick_interval(&self) -> Duration {
        (self.heartbeat_interval / 2).min(Duration::from_secs(5))
    }

    /// Spawns the loop as a `tokio::task`. The returned handle can be aborted, but graceful
    /// shutdown should prefer calling `stop()`, whose `Notify` races against the sleep so the
    /// loop exits promptly instead of waiting out the full interval.
    pub fn spawn(self: Arc<Self>, inflight_ids: Arc<dyn Fn() -> Vec<String> + Send + Sync>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(inflight_ids).await;
        })
    }

    pub fn stop(&self) {
        self.stop.notify_waiters();
    }

    async fn run(&self, inflight_ids: Arc<dyn Fn() -> Vec<String> + Send + Sync>) {
        let interval = self.tick_interval();
        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    tracing::debug!("monitor thread received stop signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            self.monitor.ping_process(self.max_connections, self.heartbeat_interval.as_secs() * 2).await;
            self.monitor.update_heartbeats(&inflight_ids()).await;

            let gc_lock_ttl_secs = (self.heartbeat_interval.as_secs() * 2).max(GC_LOCK_MIN_TTL_SECS);
            if self.monitor.acquire_gc_lock(gc_lock_ttl_secs).await {
                match self.monitor.cleanup_orphaned_requests(self.orphan_threshold.as_secs() as i64, self.broker.as_ref()).await {
                    Ok(recovered) if recovered > 0 => tracing::info!(recovered, "orphan cleanup recovered tasks"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "orphan cleanup failed"),
                }
                if !self.monitor.release_gc_lock().await {
                    tracing::warn!("lost gc lock ownership before release; another process may have reclaimed it");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_broker::InMemoryJobBroker;
    use crate::kv_store::InMemoryKvStore;
    use crate::process_identity::ProcessIdentity;

    #[tokio::test]
    async fn stop_interrupts_the_sleep_promptly() {
        let kv: Arc<dyn crate::kv_store::KvStore> = Arc::new(InMemoryKvStore::new());
        let monitor = Arc::new(TaskMonitor::new(kv, ProcessIdentity::current_for_test("m"), 60));
        let broker: Arc<dyn JobBroker> = Arc::new(InMemoryJobBroker::new());
        let thread = Arc::new(MonitorThread::new(monitor, broker, Duration::from_secs(600), Duration::from_secs(1200), 4));

        let handle = Arc::clone(&thread).spawn(Arc::new(|| Vec::new()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        thread.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "monitor thread should exit promptly after stop()");
    }
}
