//! The immutable `Request` description a producer hands to the engine, and the mutable
//! `RequestTask` the Processor wraps around it for the lifetime of one attempt.

use std::time::Duration;

use url::Url;

use crate::error::EngineError;
use crate::headers::HttpHeaders;
use crate::response::Response;
use crate::error::TaskError;

/// HTTP methods the engine will execute. The source's distinction between "body-bearing" and
/// "body-less" methods is enforced in [`Request::validate`] rather than in the type itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn allows_body(self) -> bool {
        !matches!(self, Method::Get | Method::Delete)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, fully-validated outbound HTTP request.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HttpHeaders,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    /// `None` means "use the engine's configured default"; `Some(0)` disables redirects.
    pub max_redirects: Option<u32>,
}

impl Request {
    /// Validates and constructs a `Request`. Mirrors the invariants in the data model: the URL
    /// must parse, and GET/DELETE must not carry a body.
    pub fn new(
        method: Method,
        url: &str,
        headers: HttpHeaders,
        body: Option<Vec<u8>>,
        timeout: Duration,
        max_redirects: Option<u32>,
    ) -> Result<Self, EngineError> {
        if url.trim().is_empty() {
            return Err(EngineError::InvalidRequest("url must not be empty".into()));
        }
        let parsed = Url::parse(url)
            .map_err(|e| EngineError::InvalidRequest(format!("invalid url {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::InvalidRequest(format!(
                "unsupported scheme {:?}",
                parsed.scheme()
            )));
        }
        if body.is_some() && !method.allows_body() {
            return Err(EngineError::InvalidRequest(format!(
                "{method} requests must not carry a body"
            )));
        }
        Ok(Self { method, url: parsed, headers, body, timeout, max_redirects })
    }

    /// Builds the next-hop request for a redirect: same headers/timeout, new method/url/body
    /// per the RedirectEngine's rewriting rules.
    pub fn with_redirect(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> Self {
        Self {
            method,
            url,
            headers: self.headers.clone(),
            body,
            timeout: self.timeout,
            max_redirects: self.max_redirects,
        }
    }
}

/// Lifecycle state of a [`RequestTask`]. Only the Processor transitions a task between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    New,
    Enqueued,
    Started,
    Completed,
}

/// The terminal outcome of a task: exactly one of a successful `Response` or a `TaskError`.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Response(Response),
    Error(TaskError),
}

/// A job description handed back to the `JobBroker`, either to deliver a callback or to
/// re-enqueue the original producer job during recovery/shutdown.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct JobHash {
    pub class: String,
    pub args: Vec<serde_json::Value>,
}

/// A request in flight through the Processor, from submission to callback delivery.
#[derive(Clone, Debug)]
pub struct RequestTask {
    pub correlation_id: String,
    pub request: Request,
    pub job: JobHash,
    pub callback_id: String,
    pub callback_args: serde_json::Map<String, serde_json::Value>,
    pub raise_error_responses: bool,
    pub state: TaskState,
    pub enqueued_at_ms: Option<i64>,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    /// URLs already visited, in hop order; does not include the current `request.url`.
    pub redirect_chain: Vec<String>,
    pub outcome: Option<TaskOutcome>,
}

impl RequestTask {
    pub fn new(
        correlation_id: String,
        request: Request,
        job: JobHash,
        callback_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
        raise_error_responses: bool,
    ) -> Self {
        Self {
            correlation_id,
            request,
            job,
            callback_id,
            callback_args,
            raise_error_responses,
            state: TaskState::New,
            enqueued_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            redirect_chain: Vec::new(),
            outcome: None,
        }
    }

    /// Heartbeat/inflight-registry key for this hop: `"<correlation_id>/<hop>"`.
    pub fn task_id(&self) -> String {
        let hop = self.redirect_chain.len();
        if hop == 0 {
            self.correlation_id.clone()
        } else {
            format!("{}/{hop}", self.correlation_id)
        }
    }

    pub fn mark_enqueued(&mut self, now_ms: i64) {
        self.state = TaskState::Enqueued;
        self.enqueued_at_ms = Some(now_ms);
    }

    pub fn mark_started(&mut self, now_ms: i64) {
        self.state = TaskState::Started;
        self.started_at_ms = Some(now_ms);
    }

    pub fn mark_completed(&mut self, now_ms: i64, outcome: TaskOutcome) {
        self.state = TaskState::Completed;
        self.completed_at_ms = Some(now_ms);
        self.outcome = Some(outcome);
    }

    /// Builds the job hash to push back to the `JobBroker` when this task must be re-executed
    /// verbatim (graceful-shutdown drain or orphan recovery), as opposed to delivering a
    /// callback for a completed attempt.
    pub fn reenqueue_job(&self) -> JobHash {
        self.job.clone()
    }

    /// Constructs the next-hop task for a followed redirect, sharing correlation id, callback,
    /// and extending the chain by the previously-current URL.
    pub fn next_hop(&self, next_request: Request) -> Self {
        let mut chain = self.redirect_chain.clone();
        chain.push(self.request.url.to_string());
        Self {
            correlation_id: self.correlation_id.clone(),
            request: next_request,
            job: self.job.clone(),
            callback_id: self.callback_id.clone(),
            callback_args: self.callback_args.clone(),
            raise_error_responses: self.raise_error_responses,
            state: TaskState::New,
            enqueued_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            redirect_chain: chain,
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> JobHash {
        JobHash { class: "SomeJob".into(), args: vec![serde_json::json!({"id": 1})] }
    }

    #[test]
    fn get_with_body_is_rejected() {
        let err = Request::new(
            Method::Get,
            "https://example.com",
            HttpHeaders::new(),
            Some(b"x".to_vec()),
            Duration::from_secs(5),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = Request::new(
            Method::Get,
            "ftp://example.com",
            HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn task_id_gets_hop_suffix_after_redirect() {
        let req = Request::new(
            Method::Get,
            "https://example.com/a",
            HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        let task = RequestTask::new(
            "corr-1".into(),
            req.clone(),
            sample_job(),
            "MyCallback".into(),
            serde_json::Map::new(),
            false,
        );
        assert_eq!(task.task_id(), "corr-1");

        let next_req = Request::new(
            Method::Get,
            "https://example.com/b",
            HttpHeaders::new(),
            None,
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        let hop = task.next_hop(next_req);
        assert_eq!(hop.task_id(), "corr-1/1");
        assert_eq!(hop.redirect_chain, vec!["https://example.com/a".to_string()]);
    }
}
