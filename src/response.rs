//! The immutable `Response` produced by a successfully-completed task.

use crate::headers::HttpHeaders;
use crate::payload::Payload;

/// A completed HTTP response, always for a 1xx-5xx status (transport failures never reach
/// here; they are represented as [`crate::error::TaskError::RequestError`] instead).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Option<Payload>,
    /// Wall-clock seconds spent on the whole attempt, including redirects already followed.
    pub duration: f64,
    pub correlation_id: String,
    pub url: String,
    pub method: String,
    pub callback_args: serde_json::Map<String, serde_json::Value>,
    pub redirects: Vec<String>,
}

impl Response {
    /// `200 <= status < 300`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Serializes to the wire-format Response JSON handed to a callback job argument.
    pub fn to_wire_json(&self) -> serde_json::Value {
        let headers: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::json!({
            "status": self.status,
            "headers": headers,
            "body": self.body,
            "duration": self.duration,
            "request_id": self.correlation_id,
            "url": self.url,
            "http_method": self.method,
            "callback_args": self.callback_args,
            "redirects": self.redirects,
        })
    }
}
