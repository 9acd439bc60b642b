//! Pooled outbound HTTP client shared by every task.
//!
//! A single `reqwest::Client` is held for the lifetime of the Processor. `reqwest`'s internal
//! connection pool is keyed per origin (scheme + host + port), which is exactly the pooling
//! granularity the spec calls for; redirects are disabled on the client so the
//! [`crate::redirect::RedirectEngine`] has sole authority over 3xx handling.

use std::time::Duration;

use crate::headers::HttpHeaders;
use crate::request::Request;

/// Thin wrapper around a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build()?;
        Ok(Self { inner })
    }

    /// Issues `request`, returning the live `reqwest::Response` for the caller to stream via
    /// [`crate::response_reader::ResponseReader`].
    pub async fn execute(&self, request: &Request) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self.inner.request(request.method.to_reqwest(), request.url.clone()).timeout(request.timeout);
        builder = builder.headers(request.headers.to_http_map());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await
    }
}

/// Builds the `HttpHeaders` view of a live response's headers (a convenience used by the
/// Processor when constructing a `Response`).
pub fn response_headers(response: &reqwest::Response) -> HttpHeaders {
    HttpHeaders::from_http_map(response.headers())
}
