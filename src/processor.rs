//! In-process entry point for asynchronous request execution: a bounded queue, a single
//! cooperative reactor task, per-task lifecycle tracking, capacity control, and graceful
//! shutdown.
//!
//! The reactor loop mirrors the teacher's connection-accept loop (`loop { accept().await;
//! tokio::spawn(...) }`): one task pulls work and spawns a fresh `tokio::task` per admitted
//! request, so suspension at `.await` points is cooperative multiplexing over the runtime's
//! I/O driver rather than CPU-bound competition for a reactor slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use crate::callback::CallbackRegistry;
use crate::client::{response_headers, HttpClient};
use crate::config::EngineConfig;
use crate::error::{EngineError, TaskError};
use crate::external_storage::ExternalStorage;
use crate::job_broker::JobBroker;
use crate::payload::Payload;
use crate::redirect::{RedirectDecision, RedirectEngine};
use crate::request::{RequestTask, TaskOutcome};
use crate::response::Response;
use crate::response_reader::{reinterpret_with_charset, ResponseReader};
use crate::stats::Stats;
use crate::task_monitor::TaskMonitor;
use crate::time_helper::now_ms;

/// The Processor's finite-state lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Draining,
    Stopping,
}

/// Internal queue item: either a real task or the shutdown sentinel that unblocks the reactor's
/// bounded wait so `stop()` returns promptly.
enum QueueItem {
    Task(RequestTask),
    Shutdown,
}

/// Single in-process entry point for asynchronous request execution.
pub struct Processor {
    config: EngineConfig,
    state: ArcSwap<ProcessorState>,
    sender: mpsc::UnboundedSender<QueueItem>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueueItem>>>,
    pending: Arc<Mutex<HashMap<String, RequestTask>>>,
    inflight: Arc<Mutex<HashMap<String, RequestTask>>>,
    inflight_count: AtomicUsize,
    client: HttpClient,
    task_monitor: Arc<TaskMonitor>,
    broker: Arc<dyn JobBroker>,
    external_storage: Arc<ExternalStorage>,
    callbacks: Arc<CallbackRegistry>,
    stats: Arc<Stats>,
    idle_notify: Notify,
    reactor_exited: Notify,
}

impl Processor {
    pub fn new(
        config: EngineConfig,
        task_monitor: Arc<TaskMonitor>,
        broker: Arc<dyn JobBroker>,
        external_storage: Arc<ExternalStorage>,
        callbacks: Arc<CallbackRegistry>,
        stats: Arc<Stats>,
    ) -> Result<Self, EngineError> {
        let client = HttpClient::new().map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            state: ArcSwap::from_pointee(ProcessorState::Stopped),
            sender,
            receiver: Mutex::new(Some(receiver)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            inflight_count: AtomicUsize::new(0),
            client,
            task_monitor,
            broker,
            external_storage,
            callbacks,
            stats,
            idle_notify: Notify::new(),
            reactor_exited: Notify::new(),
        })
    }

    pub fn state(&self) -> ProcessorState {
        **self.state.load()
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight_count.load(Ordering::SeqCst)
    }

    pub fn idle(&self) -> bool {
        self.inflight_count() == 0 && self.pending.lock().is_empty()
    }

    pub fn drained(&self) -> bool {
        self.state() == ProcessorState::Draining && self.idle()
    }

    /// Task ids currently registered as inflight, for the `MonitorThread`'s heartbeat pass.
    pub fn inflight_task_ids(&self) -> Vec<String> {
        self.inflight.lock().keys().cloned().collect()
    }

    /// Idempotent. Transitions stopped→starting→running and spawns the reactor task.
    pub async fn start(self: &Arc<Self>) {
        if self.state() != ProcessorState::Stopped {
            return;
        }
        self.state.store(Arc::new(ProcessorState::Starting));
        let this = Arc::clone(self);
        let mut receiver = this.receiver.lock().take().expect("receiver already taken");
        self.state.store(Arc::new(ProcessorState::Running));
        tokio::spawn(async move {
            this.reactor_loop(&mut receiver).await;
        });
        tracing::info!("processor started");
    }

    /// Submits a task for execution. Non-blocking.
    pub async fn enqueue(&self, mut task: RequestTask) -> Result<(), EngineError> {
        let state = self.state();
        if !matches!(state, ProcessorState::Running) {
            return Err(EngineError::NotRunning);
        }
        if self.inflight_count() >= self.config.max_connections {
            self.stats.record_capacity_exceeded().await;
            return Err(EngineError::MaxCapacity { max_connections: self.config.max_connections });
        }
        if !self.callbacks.contains(&task.callback_id) {
            return Err(EngineError::InvalidCallback(task.callback_id.clone()));
        }
        task.mark_enqueued(now_ms());
        self.sender.send(QueueItem::Task(task)).map_err(|_| EngineError::NotRunning)?;
        Ok(())
    }

    /// running→draining: no new enqueues accepted; inflight tasks continue.
    pub fn drain(&self) {
        if self.state() == ProcessorState::Running {
            self.state.store(Arc::new(ProcessorState::Draining));
        }
    }

    /// Any live state→stopping; interrupts the reactor; waits up to `timeout` for `idle()`;
    /// then re-enqueues everything still pending/inflight to the `JobBroker` and stops.
    pub async fn stop(&self, wait: Duration) {
        let was_running = !matches!(self.state(), ProcessorState::Stopped);
        self.state.store(Arc::new(ProcessorState::Stopping));
        let _ = self.sender.send(QueueItem::Shutdown);

        if was_running {
            let deadline = tokio::time::Instant::now() + wait;
            while !self.idle() && tokio::time::Instant::now() < deadline {
                let _ = timeout(Duration::from_millis(50), self.idle_notify.notified()).await;
            }
        }

        self.reenqueue_unfinished().await;
        self.state.store(Arc::new(ProcessorState::Stopped));
        tracing::info!("processor stopped");
    }

    /// Re-enqueues every task still pending/inflight after the shutdown wait to the
    /// `JobBroker` (their original jobs, via `RequestTask::reenqueue_job`) and unregisters
    /// each from the `TaskMonitor`. This process stays in the `processes` set after `stop()`
    /// returns, so the orphan sweep would never reclaim these on its own.
    async fn reenqueue_unfinished(&self) {
        let pending: Vec<RequestTask> = self.pending.lock().drain().map(|(_, task)| task).collect();
        let inflight: Vec<RequestTask> = self.inflight.lock().drain().map(|(_, task)| task).collect();
        if pending.is_empty() && inflight.is_empty() {
            return;
        }
        tracing::warn!(
            pending = pending.len(),
            inflight = inflight.len(),
            "re-enqueuing unfinished tasks on stop"
        );
        for task in pending.into_iter().chain(inflight.into_iter()) {
            let job = task.reenqueue_job();
            if let Err(e) = self.broker.push(job).await {
                tracing::error!(error = %e, correlation_id = %task.correlation_id, "failed to re-enqueue unfinished task on stop");
            }
            self.task_monitor.unregister(&task).await;
        }
    }

    async fn reactor_loop(self: Arc<Self>, receiver: &mut mpsc::UnboundedReceiver<QueueItem>) {
        loop {
            let item = match timeout(Duration::from_secs(1), receiver.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => continue,
            };
            match item {
                QueueItem::Shutdown => break,
                QueueItem::Task(task) => {
                    let task_id = task.task_id();
                    self.pending.lock().insert(task_id, task.clone());
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.run_task(task).await;
                    });
                }
            }
        }
        self.reactor_exited.notify_waiters();
    }

    /// Runs a task to completion, following redirects in a loop within the same sub-task.
    ///
    /// The spec describes each redirect hop as being "pushed back onto the queue"; here that
    /// is realized as continuing the same `tokio::task` with a new `RequestTask` rather than a
    /// round-trip through the admission channel, since a hop is a continuation of an
    /// already-admitted task and must never re-check capacity or re-validate the callback id.
    /// Each hop still gets its own task id (`"<correlation_id>/<hop>"`) and its own
    /// register/unregister pair with the TaskMonitor, matching the heartbeat-key semantics.
    async fn run_task(self: Arc<Self>, mut task: RequestTask) {
        let first_task_id = task.task_id();
        self.pending.lock().remove(&first_task_id);
        self.inflight.lock().insert(first_task_id.clone(), task.clone());
        self.inflight_count.fetch_add(1, Ordering::SeqCst);
        task.mark_started(now_ms());

        loop {
            let task_id = task.task_id();
            if let Err(e) = self.task_monitor.register(&task).await {
                tracing::error!(task_id, error = %e, "failed to register inflight task");
            }

            let outcome = self.execute_one_hop(&task).await;

            match outcome {
                HopOutcome::Redirect(next) => {
                    // A hop transition, not a delivery: safe to unregister immediately since
                    // no callback was promised under this hop's task id.
                    self.task_monitor.unregister(&task).await;
                    self.stats.record_redirect().await;
                    task = next;
                    // Keep the inflight entry current so a concurrent `stop()` re-enqueues and
                    // unregisters the hop actually in flight, not the first hop's stale state.
                    self.inflight.lock().insert(first_task_id.clone(), task.clone());
                    continue;
                }
                HopOutcome::Done(result) => {
                    // Ordering per the spec: the callback enqueue must be durable before we
                    // unregister, so a crash between the two only risks a duplicate delivery,
                    // never a silently dropped one. `deliver` unregisters internally, after
                    // the callback has run.
                    self.deliver(&mut task, result).await;
                    break;
                }
            }
        }

        self.finish_hop(&first_task_id).await;
    }

    async fn finish_hop(&self, task_id: &str) {
        self.inflight.lock().remove(task_id);
        self.inflight_count.fetch_sub(1, Ordering::SeqCst);
        if self.idle() {
            self.idle_notify.notify_waiters();
        }
    }

    async fn execute_one_hop(&self, task: &RequestTask) -> HopOutcome {
        let start = std::time::Instant::now();
        let response = match timeout(task.request.timeout, self.client.execute(&task.request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.stats.record_error().await;
                return HopOutcome::Done(Err(TaskError::from_reqwest(
                    &e,
                    task.request.url.as_str(),
                    task.request.method.as_str(),
                    start.elapsed(),
                    &task.correlation_id,
                    task.callback_args.clone(),
                )));
            }
            Err(_) => {
                self.stats.record_error().await;
                return HopOutcome::Done(Err(TaskError::RequestError {
                    class_name: "Timeout".into(),
                    message: "request timed out".into(),
                    backtrace: Vec::new(),
                    duration: start.elapsed().as_secs_f64(),
                    url: task.request.url.to_string(),
                    method: task.request.method.to_string(),
                    error_type: crate::error::TransportErrorType::Timeout,
                    correlation_id: task.correlation_id.clone(),
                    callback_args: task.callback_args.clone(),
                }));
            }
        };

        let status = response.status().as_u16();
        let location = response.headers().get(http::header::LOCATION).and_then(|v| v.to_str().ok()).map(str::to_string);

        match RedirectEngine::decide(task, status, location.as_deref()) {
            RedirectDecision::Follow(next) => HopOutcome::Redirect(next),
            RedirectDecision::Violation(err) => HopOutcome::Done(Err(err)),
            RedirectDecision::DoNotFollow => {
                let headers = response_headers(&response);
                let mime_type = headers.get("content-type").unwrap_or("application/octet-stream").to_string();
                let processor_stopping = self.state() != ProcessorState::Running && self.state() != ProcessorState::Draining;
                let body = ResponseReader::read(
                    response,
                    self.config.max_response_size,
                    &task.correlation_id,
                    &task.callback_args,
                    || processor_stopping,
                )
                .await;

                let body = match body {
                    Ok(body) => body,
                    Err(e) => return HopOutcome::Done(Err(e)),
                };

                let payload = body.map(|b| encode_body(b, &mime_type));

                let response = Response {
                    status,
                    headers,
                    body: payload,
                    duration: start.elapsed().as_secs_f64(),
                    correlation_id: task.correlation_id.clone(),
                    url: task.request.url.to_string(),
                    method: task.request.method.to_string(),
                    callback_args: task.callback_args.clone(),
                    redirects: task.redirect_chain.clone(),
                };

                if task.raise_error_responses && !response.is_success() {
                    let kind = crate::error::HttpErrorKind::from_status(status);
                    HopOutcome::Done(Err(TaskError::HttpError {
                        kind,
                        response,
                        correlation_id: task.correlation_id.clone(),
                        callback_args: task.callback_args.clone(),
                    }))
                } else {
                    HopOutcome::Done(Ok(response))
                }
            }
        }
    }

    /// Delivers the terminal outcome: pushes a callback job to the `JobBroker` (the durable,
    /// crash-safe path the spec actually specifies) carrying the wire payload or an
    /// `ExternalStorage` reference, then additionally dispatches to an in-process
    /// `CallbackRegistry` entry when one is registered (a convenience for same-process
    /// consumption and tests, since the JobBroker's consuming dispatch worker is out of
    /// scope). Unregisters from the TaskMonitor only after the JobBroker push succeeds.
    async fn deliver(&self, task: &mut RequestTask, result: Result<Response, TaskError>) {
        let elapsed_ms = task.started_at_ms.map(|started| now_ms() - started).unwrap_or(0).max(0);
        self.stats.record_request(Duration::from_millis(elapsed_ms as u64)).await;

        let wire = match &result {
            Ok(response) => response.to_wire_json(),
            Err(error) => {
                self.stats.record_error().await;
                error.to_wire_json()
            }
        };

        let payload_arg = match self.external_storage.store(wire).await {
            Ok(arg) => arg,
            Err(e) => {
                tracing::error!(error = %e, "failed to externalize callback payload, delivering inline");
                match &result {
                    Ok(response) => response.to_wire_json(),
                    Err(error) => error.to_wire_json(),
                }
            }
        };

        let method_name = if result.is_ok() { "on_complete" } else { "on_error" };
        let job = crate::request::JobHash {
            class: task.callback_id.clone(),
            args: vec![serde_json::json!(method_name), payload_arg],
        };
        if let Err(e) = self.broker.push(job).await {
            tracing::error!(error = %e, correlation_id = %task.correlation_id, "failed to enqueue callback job");
        }

        if let Some(callback) = self.callbacks.get(&task.callback_id) {
            match &result {
                Ok(response) => callback.on_complete(response.clone()).await,
                Err(error) => callback.on_error(error.clone()).await,
            }
        }

        task.mark_completed(now_ms(), match result {
            Ok(r) => TaskOutcome::Response(r),
            Err(e) => TaskOutcome::Error(e),
        });
        self.task_monitor.unregister(task).await;
    }
}

enum HopOutcome {
    Redirect(RequestTask),
    Done(Result<Response, TaskError>),
}

/// If the declared charset doesn't round-trip as UTF-8 on its own, reinterpret under that
/// charset first so a textual MIME type with a non-UTF-8 encoding (e.g. `charset=iso-8859-1`)
/// still lands as `text` instead of falling through to `binary`/`gzipped`.
fn encode_body(body: crate::response_reader::ReadBody, mime_type: &str) -> Payload {
    let bytes = match body.charset.as_deref() {
        Some(label) if std::str::from_utf8(&body.bytes).is_err() => {
            reinterpret_with_charset(&body.bytes, label).into_bytes()
        }
        _ => body.bytes,
    };
    Payload::encode(&bytes, mime_type, body.charset.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;
    use crate::job_broker::InMemoryJobBroker;
    use crate::kv_store::InMemoryKvStore;
    use crate::process_identity::ProcessIdentity;

    fn build_processor() -> Arc<Processor> {
        let config = EngineConfigBuilder::new().build().unwrap();
        let kv: Arc<dyn crate::kv_store::KvStore> = Arc::new(InMemoryKvStore::new());
        let monitor = Arc::new(TaskMonitor::new(kv.clone(), ProcessIdentity::current_for_test("p"), 60_000));
        let broker: Arc<dyn JobBroker> = Arc::new(InMemoryJobBroker::new());
        let storage = Arc::new(ExternalStorage::new(config.external_storage_threshold));
        let callbacks = Arc::new(CallbackRegistry::new());
        let stats = Arc::new(Stats::new(None));
        Arc::new(Processor::new(config, monitor, broker, storage, callbacks, stats).unwrap())
    }

    #[tokio::test]
    async fn enqueue_before_start_fails_not_running() {
        let processor = build_processor();
        let req = crate::request::Request::new(
            crate::request::Method::Get,
            "https://example.com",
            crate::headers::HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        let task = RequestTask::new(
            "c1".into(),
            req,
            crate::request::JobHash { class: "J".into(), args: vec![] },
            "Missing".into(),
            serde_json::Map::new(),
            false,
        );
        let err = processor.enqueue(task).await.unwrap_err();
        assert!(matches!(err, EngineError::NotRunning));
    }

    #[tokio::test]
    async fn unknown_callback_is_rejected_at_submission() {
        let processor = build_processor();
        processor.start().await;
        let req = crate::request::Request::new(
            crate::request::Method::Get,
            "https://example.com",
            crate::headers::HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        let task = RequestTask::new(
            "c1".into(),
            req,
            crate::request::JobHash { class: "J".into(), args: vec![] },
            "Missing".into(),
            serde_json::Map::new(),
            false,
        );
        let err = processor.enqueue(task).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidCallback(_)));
        processor.stop(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn stop_reenqueues_pending_tasks_to_broker_and_unregisters() {
        let config = EngineConfigBuilder::new().build().unwrap();
        let kv: Arc<dyn crate::kv_store::KvStore> = Arc::new(InMemoryKvStore::new());
        let monitor = Arc::new(TaskMonitor::new(kv.clone(), ProcessIdentity::current_for_test("p"), 60_000));
        let broker = Arc::new(InMemoryJobBroker::new());
        let storage = Arc::new(ExternalStorage::new(config.external_storage_threshold));
        let callbacks = Arc::new(CallbackRegistry::new());
        let stats = Arc::new(Stats::new(None));
        let processor = Arc::new(
            Processor::new(config, monitor.clone(), broker.clone() as Arc<dyn JobBroker>, storage, callbacks, stats).unwrap(),
        );
        processor.start().await;

        let req = crate::request::Request::new(
            crate::request::Method::Get,
            "https://example.com",
            crate::headers::HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        let task = RequestTask::new(
            "stuck-1".into(),
            req,
            crate::request::JobHash { class: "StuckJob".into(), args: vec![] },
            "Cb".into(),
            serde_json::Map::new(),
            false,
        );
        monitor.register(&task).await.unwrap();
        processor.pending.lock().insert(task.task_id(), task);

        processor.stop(Duration::from_millis(50)).await;

        assert_eq!(broker.len(), 1);
        assert_eq!(broker.drain()[0].class, "StuckJob");
        assert!(processor.pending.lock().is_empty());
        assert!(kv.zscore("inflight_index", "stuck-1").await.is_none());
    }

    #[test]
    fn encode_body_reinterprets_non_utf8_text_under_its_declared_charset() {
        // 0xE9 is "é" in ISO-8859-1 but invalid standalone UTF-8.
        let body = crate::response_reader::ReadBody { bytes: vec![0xE9], charset: Some("iso-8859-1".into()) };
        let payload = encode_body(body, "text/html");
        assert_eq!(payload.encoding, crate::payload::Encoding::Text);
        assert_eq!(payload.encoded_value, "é");
    }

    #[test]
    fn encode_body_leaves_already_valid_utf8_untouched() {
        let body = crate::response_reader::ReadBody { bytes: b"hello".to_vec(), charset: Some("utf-8".into()) };
        let payload = encode_body(body, "text/plain");
        assert_eq!(payload.encoding, crate::payload::Encoding::Text);
        assert_eq!(payload.encoded_value, "hello");
    }
}
