//! Wire encoding for request/response bodies handed between the engine and callback jobs.
//!
//! A `Payload` is the serialized form of a body that will be embedded into a JSON job
//! argument. Three encodings are supported, chosen by [`Payload::encode`] based on the MIME
//! type and the bytes themselves:
//!
//! - `text` — the bytes are valid UTF-8 and the MIME type is textual; stored verbatim.
//! - `gzipped` — large, gzip-compressible bytes; stored as base64-of-gzip.
//! - `binary` — anything else; stored as plain base64.
//!
//! Decoding is the exact inverse, so `decode(encode(x, mime)) == x` for every byte string.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::{GzDecoder, GzEncoder};
use std::io::Read;

/// Bytes are gzip-compressed only above this size and only when it actually helps.
const GZIP_MIN_BYTES: usize = 4096;

/// How a [`Payload`]'s `encoded_value` should be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Text,
    Binary,
    Gzipped,
}

/// The serialized form of a request or response body.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Payload {
    pub encoding: Encoding,
    pub encoded_value: String,
    pub charset: Option<String>,
}

impl Payload {
    /// Encodes raw bytes for the given MIME type (e.g. `"application/json"`), choosing the
    /// cheapest encoding that preserves the bytes exactly.
    pub fn encode(bytes: &[u8], mime_type: &str, charset: Option<&str>) -> Self {
        if is_textual_mime(mime_type) {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return Self {
                    encoding: Encoding::Text,
                    encoded_value: text.to_string(),
                    charset: charset.map(str::to_string),
                };
            }
        }

        if bytes.len() >= GZIP_MIN_BYTES {
            if let Some(gzipped) = try_gzip(bytes) {
                return Self {
                    encoding: Encoding::Gzipped,
                    encoded_value: BASE64.encode(gzipped),
                    charset: charset.map(str::to_string),
                };
            }
        }

        Self {
            encoding: Encoding::Binary,
            encoded_value: BASE64.encode(bytes),
            charset: charset.map(str::to_string),
        }
    }

    /// Decodes back into the original bytes.
    pub fn decode(&self) -> Result<Vec<u8>, PayloadDecodeError> {
        match self.encoding {
            Encoding::Text => Ok(self.encoded_value.clone().into_bytes()),
            Encoding::Binary => BASE64
                .decode(&self.encoded_value)
                .map_err(PayloadDecodeError::InvalidBase64),
            Encoding::Gzipped => {
                let compressed = BASE64
                    .decode(&self.encoded_value)
                    .map_err(PayloadDecodeError::InvalidBase64)?;
                let mut decoder = GzDecoder::new(&compressed[..]);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(PayloadDecodeError::InvalidGzip)?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadDecodeError {
    #[error("payload was not valid base64: {0}")]
    InvalidBase64(base64::DecodeError),
    #[error("payload was not valid gzip: {0}")]
    InvalidGzip(std::io::Error),
}

/// `text/*` and a handful of structured `application/*` subtypes are treated as textual.
fn is_textual_mime(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match essence.parse::<mime::Mime>() {
        Ok(m) => {
            m.type_() == mime::TEXT
                || (m.type_() == mime::APPLICATION
                    && matches!(m.subtype().as_str(), "json" | "xml" | "javascript"))
        }
        Err(_) => false,
    }
}

/// Gzips `bytes`, returning `None` if compression did not actually shrink the payload.
fn try_gzip(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(bytes, Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).ok()?;
    if out.len() < bytes.len() { Some(out) } else { None }
}
