//! Top-level composition root, replacing the source's module-level singleton accessors with
//! an explicit value owning configuration, the Processor, the TaskMonitor, the JobBroker
//! adapter, the callback registry, and the external-storage registry.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::callback::{Callback, CallbackRegistry};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::external_storage::ExternalStorage;
use crate::headers::HttpHeaders;
use crate::job_broker::JobBroker;
use crate::kv_store::KvStore;
use crate::monitor_thread::MonitorThread;
use crate::process_identity::ProcessIdentity;
use crate::processor::{Processor, ProcessorState};
use crate::request::{JobHash, Method, Request, RequestTask};
use crate::stats::Stats;
use crate::task_monitor::TaskMonitor;

/// Options accompanying a producer's call to [`Engine::enqueue_request`], mirroring the
/// `opts` bag in the spec's producer API (`callback_args`, `raise_error_responses`,
/// `request_id`; `synchronous` is out of scope for this async engine and omitted).
#[derive(Default)]
pub struct EnqueueOptions {
    pub callback_args: serde_json::Map<String, serde_json::Value>,
    pub raise_error_responses: bool,
    pub request_id: Option<String>,
}

/// The composed engine: owns every collaborator a producer needs, in place of the source's
/// global "current configuration / current job / current processor" accessors.
pub struct Engine {
    config: EngineConfig,
    processor: Arc<Processor>,
    task_monitor: Arc<TaskMonitor>,
    broker: Arc<dyn JobBroker>,
    external_storage: Arc<ExternalStorage>,
    callbacks: Arc<CallbackRegistry>,
    stats: Arc<Stats>,
    monitor_thread: Arc<MonitorThread>,
    monitor_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, kv_store: Arc<dyn KvStore>, broker: Arc<dyn JobBroker>) -> Result<Self, EngineError> {
        let identity = ProcessIdentity::current();
        let orphan_threshold_ms = config.orphan_threshold.as_millis() as i64;
        let task_monitor = Arc::new(TaskMonitor::new(kv_store.clone(), identity, orphan_threshold_ms));
        let external_storage = Arc::new(ExternalStorage::new(config.external_storage_threshold));
        let callbacks = Arc::new(CallbackRegistry::new());
        let stats = Arc::new(Stats::new(Some(kv_store)));

        let processor = Arc::new(Processor::new(
            config.clone(),
            task_monitor.clone(),
            broker.clone(),
            external_storage.clone(),
            callbacks.clone(),
            stats.clone(),
        )?);

        let monitor_thread = Arc::new(MonitorThread::new(
            task_monitor.clone(),
            broker.clone(),
            config.heartbeat_interval,
            config.orphan_threshold,
            config.max_connections,
        ));

        Ok(Self {
            config,
            processor,
            task_monitor,
            broker,
            external_storage,
            callbacks,
            stats,
            monitor_thread,
            monitor_handle: std::sync::Mutex::new(None),
        })
    }

    pub fn register_callback(&self, id: impl Into<String>, callback: Arc<dyn Callback>) {
        self.callbacks.register(id, callback);
    }

    pub fn external_storage(&self) -> &Arc<ExternalStorage> {
        &self.external_storage
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn state(&self) -> ProcessorState {
        self.processor.state()
    }

    pub fn inflight_count(&self) -> usize {
        self.processor.inflight_count()
    }

    /// Starts the Processor's reactor task and the MonitorThread.
    pub async fn start(&self) {
        self.processor.start().await;
        let processor = self.processor.clone();
        let ids_fn: Arc<dyn Fn() -> Vec<String> + Send + Sync> = Arc::new(move || processor.inflight_task_ids());
        let handle = Arc::clone(&self.monitor_thread).spawn(ids_fn);
        *self.monitor_handle.lock().unwrap() = Some(handle);
    }

    pub fn drain(&self) {
        self.processor.drain();
    }

    pub async fn stop(&self, wait: Duration) {
        self.processor.stop(wait).await;
        self.monitor_thread.stop();
        if let Some(handle) = self.monitor_handle.lock().unwrap().take() {
            let _ = handle.await;
        }
    }

    /// Validates and submits a request. Synchronous errors (bad request, no callback, at
    /// capacity, not running) surface directly; everything else goes to the callback.
    pub async fn enqueue_request(
        &self,
        method: Method,
        url: &str,
        headers: HttpHeaders,
        body: Option<Vec<u8>>,
        timeout: Option<Duration>,
        max_redirects: Option<u32>,
        callback_id: &str,
        job: JobHash,
        opts: EnqueueOptions,
    ) -> Result<(), EngineError> {
        validate_callback_args(&opts.callback_args)?;

        let request = Request::new(
            method,
            url,
            headers,
            body,
            timeout.unwrap_or(self.config.default_timeout),
            max_redirects.or(Some(self.config.default_max_redirects)),
        )?;

        let correlation_id = opts.request_id.unwrap_or_else(|| self.task_monitor.identity().task_id(&Uuid::new_v4().to_string()));

        let task = RequestTask::new(
            correlation_id,
            request,
            job,
            callback_id.to_string(),
            opts.callback_args,
            opts.raise_error_responses || self.config.raise_error_responses,
        );

        self.processor.enqueue(task).await
    }
}

/// callback_args must already be a flat JSON object with string keys (enforced by its type)
/// and JSON-native scalar/array/object values; this rejects values that would not survive a
/// JSON round trip, such as NaN floats.
fn validate_callback_args(args: &serde_json::Map<String, serde_json::Value>) -> Result<(), EngineError> {
    fn is_json_native(value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(f64::is_finite).unwrap_or(true),
            serde_json::Value::Array(items) => items.iter().all(is_json_native),
            serde_json::Value::Object(map) => map.values().all(is_json_native),
            _ => true,
        }
    }
    if args.values().all(is_json_native) {
        Ok(())
    } else {
        Err(EngineError::InvalidCallbackArgs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_broker::InMemoryJobBroker;
    use crate::kv_store::InMemoryKvStore;
    use crate::config::EngineConfigBuilder;
    use async_trait::async_trait;

    struct NoopCallback;
    #[async_trait]
    impl Callback for NoopCallback {
        async fn on_complete(&self, _response: crate::response::Response) {}
        async fn on_error(&self, _error: crate::error::TaskError) {}
    }

    fn build_engine() -> Engine {
        let config = EngineConfigBuilder::new().build().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let broker: Arc<dyn JobBroker> = Arc::new(InMemoryJobBroker::new());
        Engine::new(config, kv, broker).unwrap()
    }

    #[tokio::test]
    async fn enqueue_before_start_fails_not_running() {
        let engine = build_engine();
        engine.register_callback("Cb", Arc::new(NoopCallback));
        let err = engine
            .enqueue_request(
                Method::Get,
                "https://example.com",
                HttpHeaders::new(),
                None,
                None,
                None,
                "Cb",
                JobHash { class: "J".into(), args: vec![] },
                EnqueueOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));
    }

    #[tokio::test]
    async fn enqueue_after_start_succeeds_for_registered_callback() {
        let engine = build_engine();
        engine.register_callback("Cb", Arc::new(NoopCallback));
        engine.start().await;
        let result = engine
            .enqueue_request(
                Method::Get,
                "https://example.com",
                HttpHeaders::new(),
                None,
                None,
                None,
                "Cb",
                JobHash { class: "J".into(), args: vec![] },
                EnqueueOptions::default(),
            )
            .await;
        assert!(result.is_ok());
        engine.stop(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn non_finite_callback_args_are_rejected() {
        let engine = build_engine();
        engine.register_callback("Cb", Arc::new(NoopCallback));
        engine.start().await;
        let mut args = serde_json::Map::new();
        args.insert("x".into(), serde_json::json!(f64::NAN));
        let err = engine
            .enqueue_request(
                Method::Get,
                "https://example.com",
                HttpHeaders::new(),
                None,
                None,
                None,
                "Cb",
                JobHash { class: "J".into(), args: vec![] },
                EnqueueOptions { callback_args: args, ..Default::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCallbackArgs));
        engine.stop(Duration::from_millis(200)).await;
    }
}
