//! Case-insensitive HTTP header storage shared by `Request` and `Response`.
//!
//! The spec calls for header keys stored lowercased with value-based equality, which is a
//! narrower contract than `http::HeaderMap` (which preserves original casing and allows
//! multi-valued headers via an ordered multimap). `HttpHeaders` wraps a `BTreeMap` keyed by
//! lowercase header name, giving deterministic iteration order (handy for hashing wire
//! payloads) at the cost of collapsing duplicate headers — acceptable here since the engine
//! never needs to round-trip `Set-Cookie`-style multi-value headers through this type.

use std::collections::BTreeMap;
use std::iter::FromIterator;

/// A case-insensitive, value-equal header map.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HttpHeaders(BTreeMap<String, String>);

impl HttpHeaders {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, lowercasing the key. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Looks up a header by name, case-insensitively.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.0.get(&key.as_ref().to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns true if the given header is present.
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.0.contains_key(&key.as_ref().to_ascii_lowercase())
    }

    /// Iterates over `(lowercase key, value)` pairs in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds from a `reqwest`/`http` header map, collapsing repeated header names by keeping
    /// the last occurrence (matching the source's behaviour of treating headers as a plain
    /// hash rather than a multimap).
    pub fn from_http_map(map: &http::HeaderMap) -> Self {
        let mut out = BTreeMap::new();
        for (name, value) in map.iter() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        Self(out)
    }

    /// Renders into an `http::HeaderMap` suitable for handing to an HTTP client.
    pub fn to_http_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::with_capacity(self.0.len());
        for (k, v) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(k.as_bytes()),
                http::HeaderValue::from_str(v),
            ) {
                map.insert(name, value);
            }
        }
        map
    }
}

impl FromIterator<(String, String)> for HttpHeaders {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}
