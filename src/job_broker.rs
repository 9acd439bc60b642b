//! Abstract interface to the host's background-job framework.
//!
//! The engine never knows what job system a host runs; it only needs to push a job hash
//! (class identifier + args array) back onto it, either to deliver a callback or to
//! re-enqueue a producer's original job during recovery or shutdown.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::request::JobHash;

#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn push(&self, job: JobHash) -> anyhow::Result<()>;
}

/// An in-process `JobBroker` that simply records pushed jobs, useful for tests and for
/// single-process deployments where the "callback worker" lives in the same process and
/// drains this queue directly.
pub struct InMemoryJobBroker {
    pushed: Mutex<Vec<JobHash>>,
}

impl InMemoryJobBroker {
    pub fn new() -> Self {
        Self { pushed: Mutex::new(Vec::new()) }
    }

    /// Drains and returns all jobs pushed so far, in push order.
    pub fn drain(&self) -> Vec<JobHash> {
        std::mem::take(&mut self.pushed.lock())
    }

    pub fn len(&self) -> usize {
        self.pushed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushed.lock().is_empty()
    }
}

impl Default for InMemoryJobBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBroker for InMemoryJobBroker {
    async fn push(&self, job: JobHash) -> anyhow::Result<()> {
        self.pushed.lock().push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_drain_preserves_order() {
        let broker = InMemoryJobBroker::new();
        broker.push(JobHash { class: "A".into(), args: vec![] }).await.unwrap();
        broker.push(JobHash { class: "B".into(), args: vec![] }).await.unwrap();
        let jobs = broker.drain();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].class, "A");
        assert_eq!(jobs[1].class, "B");
        assert!(broker.is_empty());
    }
}
