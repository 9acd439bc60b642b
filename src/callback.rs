//! Replaces the dynamic class-lookup a reflective host language would use to dispatch a
//! callback identifier to a handler: producers register a concrete [`Callback`] implementation
//! under a string id up front, and submission-time validation rejects unknown ids.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::TaskError;
use crate::response::Response;

/// Exactly one of `on_complete`/`on_error` is invoked per task, at least once (duplicate
/// delivery is possible under crash recovery; implementations must be idempotent).
#[async_trait]
pub trait Callback: Send + Sync {
    async fn on_complete(&self, response: Response);
    async fn on_error(&self, error: TaskError);
}

/// Maps string callback ids to registered handlers.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Callback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, callback: Arc<dyn Callback>) {
        self.handlers.write().insert(id.into(), callback);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Callback>> {
        self.handlers.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    #[async_trait]
    impl Callback for Counting {
        async fn on_complete(&self, _response: Response) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_error(&self, _error: TaskError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unregistered_id_is_absent() {
        let registry = CallbackRegistry::new();
        assert!(!registry.contains("MyCallback"));
        assert!(registry.get("MyCallback").is_none());
    }

    #[tokio::test]
    async fn registered_callback_dispatches() {
        let registry = CallbackRegistry::new();
        let handler = Arc::new(Counting { completes: AtomicUsize::new(0), errors: AtomicUsize::new(0) });
        registry.register("MyCallback", handler.clone());
        assert!(registry.contains("MyCallback"));

        let cb = registry.get("MyCallback").unwrap();
        cb.on_complete(Response {
            status: 200,
            headers: crate::headers::HttpHeaders::new(),
            body: None,
            duration: 0.0,
            correlation_id: "c".into(),
            url: "https://example.com".into(),
            method: "GET".into(),
            callback_args: serde_json::Map::new(),
            redirects: Vec::new(),
        })
        .await;
        assert_eq!(handler.completes.load(Ordering::SeqCst), 1);
    }
}
