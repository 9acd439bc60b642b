//! Reads a response body cooperatively with a hard size ceiling, mirroring the fast-path
//! Content-Length rejection and mid-stream accumulation check the teacher's body-size-limiting
//! middleware uses on the inbound side.

use futures_util::StreamExt;

use crate::error::TaskError;

/// Outcome of a successful read: the raw bytes plus the charset extracted from Content-Type,
/// if any and if recognized.
pub struct ReadBody {
    pub bytes: Vec<u8>,
    pub charset: Option<String>,
}

pub struct ResponseReader;

impl ResponseReader {
    /// Reads `response`'s body, aborting with [`TaskError::ResponseTooLargeError`] if it would
    /// exceed `max_response_size`. `shutdown` is polled before each chunk is appended so a
    /// Processor transitioning to stopping/stopped can abandon the read early.
    pub async fn read(
        mut response: reqwest::Response,
        max_response_size: usize,
        correlation_id: &str,
        callback_args: &serde_json::Map<String, serde_json::Value>,
        mut should_abandon: impl FnMut() -> bool,
    ) -> Result<Option<ReadBody>, TaskError> {
        let url = response.url().to_string();
        let charset = extract_charset(response.headers());

        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_response_size {
                return Err(too_large(max_response_size, &url, correlation_id, callback_args));
            }
            if content_length == 0 {
                return Ok(None);
            }
        }

        let mut buf = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            TaskError::from_reqwest(&e, &url, "GET", std::time::Duration::ZERO, correlation_id, callback_args.clone())
        })? {
            if should_abandon() {
                return Ok(None);
            }
            buf.extend_from_slice(&chunk);
            if buf.len() > max_response_size {
                return Err(too_large(max_response_size, &url, correlation_id, callback_args));
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(ReadBody { bytes: buf, charset }))
    }

    /// Streaming variant used when the caller already has a `bytes_stream`; kept separate so
    /// tests can exercise chunk-boundary behaviour without a live `reqwest::Response`.
    pub async fn read_stream(
        mut stream: impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin,
        max_response_size: usize,
    ) -> Result<Vec<u8>, &'static str> {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|_| "stream error")?;
            buf.extend_from_slice(&chunk);
            if buf.len() > max_response_size {
                return Err("too large");
            }
        }
        Ok(buf)
    }
}

fn too_large(
    max_response_size: usize,
    url: &str,
    correlation_id: &str,
    callback_args: &serde_json::Map<String, serde_json::Value>,
) -> TaskError {
    TaskError::ResponseTooLargeError {
        max_response_size,
        url: url.to_string(),
        correlation_id: correlation_id.to_string(),
        callback_args: callback_args.clone(),
    }
}

/// Extracts a `charset` from `Content-Type`, case-insensitively, stripping surrounding quotes.
fn extract_charset(headers: &http::HeaderMap) -> Option<String> {
    let content_type = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    let lower = content_type.to_ascii_lowercase();
    let idx = lower.find("charset")?;
    let rest = &content_type[idx + "charset".len()..];
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?;
    let value = rest.split(';').next().unwrap_or(rest).trim();
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    if value.is_empty() { None } else { Some(value.to_string()) }
}

/// Reinterprets `bytes` under `charset_label` using `encoding_rs`; returns the original bytes
/// as lossy UTF-8 if the label is unrecognized (the spec's "log and leave as bytes" path,
/// here expressed as a best-effort decode since the caller only wants a printable string).
pub fn reinterpret_with_charset(bytes: &[u8], charset_label: &str) -> String {
    match encoding_rs::Encoding::for_label(charset_label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            tracing::warn!(charset = charset_label, "unrecognized charset, leaving body as raw bytes");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_is_extracted_case_insensitively() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "text/html; CHARSET=\"iso-8859-1\"".parse().unwrap());
        assert_eq!(extract_charset(&headers), Some("iso-8859-1".to_string()));
    }

    #[test]
    fn missing_charset_returns_none() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(extract_charset(&headers), None);
    }

    #[test]
    fn reinterpret_falls_back_on_unknown_charset() {
        let text = reinterpret_with_charset(b"hello", "not-a-real-charset");
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn read_stream_rejects_oversized_mid_stream_accumulation() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> =
            vec![Ok(bytes::Bytes::from_static(b"0123456789")), Ok(bytes::Bytes::from_static(b"0123456789"))];
        let stream = tokio_stream::iter(chunks);
        let result = ResponseReader::read_stream(stream, 15).await;
        assert_eq!(result, Err("too large"));
    }

    #[tokio::test]
    async fn read_stream_accepts_exact_ceiling() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![Ok(bytes::Bytes::from_static(b"0123456789"))];
        let stream = tokio_stream::iter(chunks);
        let result = ResponseReader::read_stream(stream, 10).await.unwrap();
        assert_eq!(result.len(), 10);
    }
}
