//! Error taxonomy for the engine.
//!
//! Two distinct error families exist, matching the propagation policy in the spec:
//!
//! - [`EngineError`] — submission-time validation failures, returned synchronously to the
//!   producer from `Processor::enqueue`/`Engine::enqueue_request`.
//! - [`TaskError`] — runtime failures of an admitted task, *never* surfaced to the producer;
//!   always delivered to the task's callback via [`crate::callback::Callback::on_error`].

use std::time::Duration;

use crate::response::Response;

/// Errors returned synchronously from request submission.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("processor is not running")]
    NotRunning,
    #[error("processor is at max capacity ({max_connections} inflight)")]
    MaxCapacity { max_connections: usize },
    #[error("no callback registered for id {0:?}")]
    InvalidCallback(String),
    #[error("callback_args must be a JSON object with string keys and JSON-native values")]
    InvalidCallbackArgs,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a transport-level attempt failed before a response (or proper HTTP error) existed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorType {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    Unreachable,
    Tls,
    Protocol,
    Unknown,
}

impl TransportErrorType {
    /// Best-effort classification of a `reqwest::Error` into one of our transport tags.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportErrorType::Timeout;
        }
        if err.is_connect() {
            let msg = err.to_string();
            if msg.contains("refused") {
                return TransportErrorType::ConnectionRefused;
            }
            if msg.contains("unreachable") {
                return TransportErrorType::Unreachable;
            }
            return TransportErrorType::ConnectionReset;
        }
        if let Some(source) = err.source_chain_contains_tls() {
            if source {
                return TransportErrorType::Tls;
            }
        }
        if err.is_request() || err.is_decode() {
            return TransportErrorType::Protocol;
        }
        TransportErrorType::Unknown
    }
}

/// Small helper trait kept private to this module logically, but defined at crate level so
/// `TransportErrorType::classify` stays a thin, readable dispatcher.
trait TlsSourceCheck {
    fn source_chain_contains_tls(&self) -> Option<bool>;
}

impl TlsSourceCheck for reqwest::Error {
    fn source_chain_contains_tls(&self) -> Option<bool> {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string().to_ascii_lowercase();
            if text.contains("tls") || text.contains("certificate") || text.contains("ssl") {
                return Some(true);
            }
            cause = err.source();
        }
        Some(false)
    }
}

/// Which side of the status-code divide an [`HttpError`] falls on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpErrorKind {
    Client,
    Server,
}

impl HttpErrorKind {
    /// Computes the kind from a status code; panics if `status` is not 4xx/5xx, since callers
    /// only construct an `HttpError` after confirming non-2xx-and-not-3xx.
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => HttpErrorKind::Client,
            500..=599 => HttpErrorKind::Server,
            other => unreachable!("HttpError constructed for non-4xx/5xx status {other}"),
        }
    }
}

/// Runtime failure of an admitted task, delivered to the callback's `on_error`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "error_type_tag")]
pub enum TaskError {
    /// Network/timeout/SSL/protocol/unknown transport failure.
    RequestError {
        class_name: String,
        message: String,
        backtrace: Vec<String>,
        duration: f64,
        url: String,
        method: String,
        error_type: TransportErrorType,
        correlation_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
    },
    /// Non-2xx HTTP response, only raised when `raise_error_responses` is set.
    HttpError {
        kind: HttpErrorKind,
        response: Response,
        correlation_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
    },
    /// The chain exceeded `max_redirects`.
    TooManyRedirectsError {
        redirects: Vec<String>,
        attempted_url: String,
        correlation_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
    },
    /// The chain revisited a URL already seen.
    RecursiveRedirectError {
        redirects: Vec<String>,
        offending_url: String,
        correlation_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
    },
    /// The response body exceeded `max_response_size`.
    ResponseTooLargeError {
        max_response_size: usize,
        url: String,
        correlation_id: String,
        callback_args: serde_json::Map<String, serde_json::Value>,
    },
}

impl TaskError {
    pub fn correlation_id(&self) -> &str {
        match self {
            TaskError::RequestError { correlation_id, .. }
            | TaskError::HttpError { correlation_id, .. }
            | TaskError::TooManyRedirectsError { correlation_id, .. }
            | TaskError::RecursiveRedirectError { correlation_id, .. }
            | TaskError::ResponseTooLargeError { correlation_id, .. } => correlation_id,
        }
    }

    pub fn callback_args(&self) -> &serde_json::Map<String, serde_json::Value> {
        match self {
            TaskError::RequestError { callback_args, .. }
            | TaskError::HttpError { callback_args, .. }
            | TaskError::TooManyRedirectsError { callback_args, .. }
            | TaskError::RecursiveRedirectError { callback_args, .. }
            | TaskError::ResponseTooLargeError { callback_args, .. } => callback_args,
        }
    }

    /// Builds a `RequestError` from a live `reqwest::Error`.
    pub fn from_reqwest(
        err: &reqwest::Error,
        url: &str,
        method: &str,
        duration: Duration,
        correlation_id: &str,
        callback_args: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        TaskError::RequestError {
            class_name: "reqwest::Error".to_string(),
            message: err.to_string(),
            backtrace: Vec::new(),
            duration: duration.as_secs_f64(),
            url: url.to_string(),
            method: method.to_string(),
            error_type: TransportErrorType::classify(err),
            correlation_id: correlation_id.to_string(),
            callback_args,
        }
    }

    /// Serializes to the wire-format Error JSON documented in the spec (`§6`).
    pub fn to_wire_json(&self) -> serde_json::Value {
        match self {
            TaskError::RequestError {
                class_name,
                message,
                backtrace,
                duration,
                url,
                method,
                error_type,
                correlation_id,
                callback_args,
            } => serde_json::json!({
                "error_class": "RequestError",
                "message": message,
                "backtrace": backtrace,
                "class_name": class_name,
                "error_type": error_type,
                "request_id": correlation_id,
                "duration": duration,
                "url": url,
                "http_method": method,
                "callback_args": callback_args,
            }),
            TaskError::HttpError { kind, response, correlation_id, callback_args } => serde_json::json!({
                "error_class": "HttpError",
                "message": format!("HTTP {}", response.status),
                "backtrace": Vec::<String>::new(),
                "class_name": match kind {
                    HttpErrorKind::Client => "ClientError",
                    HttpErrorKind::Server => "ServerError",
                },
                "error_type": "http",
                "request_id": correlation_id,
                "duration": response.duration,
                "url": response.url,
                "http_method": response.method,
                "callback_args": callback_args,
                "redirects": response.redirects,
            }),
            TaskError::TooManyRedirectsError { redirects, attempted_url, correlation_id, callback_args } => {
                serde_json::json!({
                    "error_class": "RedirectError",
                    "message": format!("too many redirects, attempted {attempted_url}"),
                    "backtrace": Vec::<String>::new(),
                    "class_name": "TooManyRedirectsError",
                    "error_type": "redirect",
                    "request_id": correlation_id,
                    "duration": 0.0,
                    "url": attempted_url,
                    "http_method": "",
                    "callback_args": callback_args,
                    "redirects": redirects,
                })
            }
            TaskError::RecursiveRedirectError { redirects, offending_url, correlation_id, callback_args } => {
                serde_json::json!({
                    "error_class": "RedirectError",
                    "message": format!("recursive redirect to {offending_url}"),
                    "backtrace": Vec::<String>::new(),
                    "class_name": "RecursiveRedirectError",
                    "error_type": "redirect",
                    "request_id": correlation_id,
                    "duration": 0.0,
                    "url": offending_url,
                    "http_method": "",
                    "callback_args": callback_args,
                    "redirects": redirects,
                })
            }
            TaskError::ResponseTooLargeError { max_response_size, url, correlation_id, callback_args } => {
                serde_json::json!({
                    "error_class": "ResponseTooLargeError",
                    "message": format!("response exceeded {max_response_size} bytes"),
                    "backtrace": Vec::<String>::new(),
                    "class_name": "ResponseTooLargeError",
                    "error_type": "too_large",
                    "request_id": correlation_id,
                    "duration": 0.0,
                    "url": url,
                    "http_method": "",
                    "callback_args": callback_args,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_kind_from_status() {
        assert_eq!(HttpErrorKind::from_status(404), HttpErrorKind::Client);
        assert_eq!(HttpErrorKind::from_status(500), HttpErrorKind::Server);
    }

    #[test]
    #[should_panic]
    fn http_error_kind_panics_on_non_error_status() {
        HttpErrorKind::from_status(200);
    }

    #[test]
    fn too_many_redirects_wire_json_carries_chain() {
        let err = TaskError::TooManyRedirectsError {
            redirects: vec!["https://a".into(), "https://b".into()],
            attempted_url: "https://c".into(),
            correlation_id: "corr-1".into(),
            callback_args: serde_json::Map::new(),
        };
        let json = err.to_wire_json();
        assert_eq!(json["redirects"].as_array().unwrap().len(), 2);
        assert_eq!(json["class_name"], "TooManyRedirectsError");
    }
}
