//! An asynchronous outbound HTTP request-execution engine, decoupled from job-worker slots.
//!
//! A producer — typically a background-job worker whose own execution slot is precious —
//! submits a [`request::Request`] plus a callback identifier through an [`engine::Engine`];
//! the engine executes the request on a small set of cooperative tasks, then delivers the
//! result to the registered [`callback::Callback`], freeing the producer's worker slot for
//! the whole duration of the network call.
//!
//! # High-level features
//! - A single-process [`processor::Processor`] with a bounded queue, cooperative scheduling,
//!   capacity control, and graceful shutdown
//! - A distributed inflight registry ([`task_monitor::TaskMonitor`]) backed by an abstract
//!   [`kv_store::KvStore`], with heartbeats, orphan detection, and a GC lock
//! - Redirect following with loop/depth limits ([`redirect::RedirectEngine`])
//! - Size-ceilinged, charset-aware response body reads ([`response_reader::ResponseReader`])
//! - Payload externalization for oversized bodies ([`external_storage::ExternalStorage`])
//!
//! # Quickstart
//!
//! ```rust,no_run
//! use async_http_engine::{
//!     callback::Callback,
//!     config::EngineConfigBuilder,
//!     engine::{Engine, EnqueueOptions},
//!     error::TaskError,
//!     headers::HttpHeaders,
//!     job_broker::InMemoryJobBroker,
//!     kv_store::InMemoryKvStore,
//!     request::{JobHash, Method},
//!     response::Response,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct PrintCallback;
//!
//! #[async_trait]
//! impl Callback for PrintCallback {
//!     async fn on_complete(&self, response: Response) {
//!         println!("got {} from {}", response.status, response.url);
//!     }
//!     async fn on_error(&self, error: TaskError) {
//!         eprintln!("request failed: {error:?}");
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfigBuilder::new().build()?;
//! let kv_store = Arc::new(InMemoryKvStore::new());
//! let broker = Arc::new(InMemoryJobBroker::new());
//! let engine = Engine::new(config, kv_store, broker)?;
//! engine.register_callback("PrintCallback", Arc::new(PrintCallback));
//! engine.start().await;
//!
//! engine
//!     .enqueue_request(
//!         Method::Get,
//!         "https://example.com",
//!         HttpHeaders::new(),
//!         None,
//!         None,
//!         None,
//!         "PrintCallback",
//!         JobHash { class: "ExampleJob".into(), args: vec![] },
//!         EnqueueOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//! - `tracing-init` — structured tracing subscriber initialization helper

/// Callback registration and dispatch, replacing dynamic callback-class lookup with a static
/// string-id → handler registry.
pub mod callback;

/// Engine-wide configuration: a plain data struct with a validating fluent builder.
pub mod config;

/// Pooled outbound HTTP client shared by every task.
pub mod client;

/// Top-level composition root owning the Processor, TaskMonitor, JobBroker, and registries.
pub mod engine;

/// Submission-time and runtime error taxonomies.
pub mod error;

/// Indirection for oversized callback payloads via a pluggable blob store.
pub mod external_storage;

/// Case-insensitive HTTP header storage.
pub mod headers;

/// Abstract interface to the host's background-job framework, plus an in-memory reference.
pub mod job_broker;

/// Abstract key-value store interface used by the inflight registry, plus an in-memory
/// reference implementation.
pub mod kv_store;

/// Background heartbeat and orphan-recovery loop.
pub mod monitor_thread;

/// Wire encoding for request/response bodies.
pub mod payload;

/// Process identity used to namespace task ids across processes.
pub mod process_identity;

/// In-process entry point for asynchronous request execution.
pub mod processor;

/// Follows 3xx responses with loop and depth limits.
pub mod redirect;

/// Immutable `Request`, mutable `RequestTask`, and their lifecycle.
pub mod request;

/// The immutable `Response` produced by a completed task.
pub mod response;

/// Streaming body reads with a hard size ceiling and charset handling.
pub mod response_reader;

/// Best-effort running statistics.
pub mod stats;

/// Durable, cross-process inflight task registry.
pub mod task_monitor;

/// Monotonic timestamp helpers.
pub mod time_helper;

/// Structured tracing subscriber initialization, gated behind the `tracing-init` feature.
#[cfg(feature = "tracing-init")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing-init")))]
pub mod tracing_init;

pub use engine::Engine;
pub use error::{EngineError, TaskError};
pub use request::{Method, Request};
pub use response::Response;
