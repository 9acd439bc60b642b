//! Engine-wide configuration: a plain data struct with sane defaults and a fluent builder
//! that validates cross-field invariants at `.build()` time, following the shape of the
//! teacher's `plugins::rate_limiter::Config`/`Builder` pair.

use std::time::Duration;

use crate::error::EngineError;

/// Immutable, validated configuration for an [`crate::engine::Engine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum number of admitted (already-dequeued) tasks allowed inflight at once.
    pub max_connections: usize,
    /// Default per-request timeout used when a `Request` doesn't specify its own.
    pub default_timeout: Duration,
    /// Default redirect cap used when a `Request` doesn't specify its own.
    pub default_max_redirects: u32,
    /// Hard ceiling on response body size.
    pub max_response_size: usize,
    /// Threshold (serialized-JSON bytes) above which `ExternalStorage` externalizes a payload.
    pub external_storage_threshold: usize,
    /// How often the `MonitorThread` pings and heartbeats (actual sleep is half this, capped
    /// at 5s, per the spec's loop cadence).
    pub heartbeat_interval: Duration,
    /// Age past which an inflight entry with no live owning process is considered orphaned.
    pub orphan_threshold: Duration,
    /// How long `stop()` waits for inflight tasks to finish before forcing a drain.
    pub shutdown_timeout: Duration,
    /// Whether non-2xx responses should be delivered as `HttpError` instead of `Response`.
    pub raise_error_responses: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            default_timeout: Duration::from_secs(30),
            default_max_redirects: 5,
            max_response_size: 10 * 1024 * 1024,
            external_storage_threshold: 256 * 1024,
            heartbeat_interval: Duration::from_secs(10),
            orphan_threshold: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            raise_error_responses: false,
        }
    }
}

/// Fluent builder for [`EngineConfig`]; `.build()` validates cross-field invariants.
#[derive(Clone, Debug)]
pub struct EngineConfigBuilder(EngineConfig);

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self(EngineConfig::default())
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.0.max_connections = n;
        self
    }

    pub fn default_timeout(mut self, d: Duration) -> Self {
        self.0.default_timeout = d;
        self
    }

    pub fn default_max_redirects(mut self, n: u32) -> Self {
        self.0.default_max_redirects = n;
        self
    }

    pub fn max_response_size(mut self, n: usize) -> Self {
        self.0.max_response_size = n;
        self
    }

    pub fn external_storage_threshold(mut self, n: usize) -> Self {
        self.0.external_storage_threshold = n;
        self
    }

    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.0.heartbeat_interval = d;
        self
    }

    pub fn orphan_threshold(mut self, d: Duration) -> Self {
        self.0.orphan_threshold = d;
        self
    }

    pub fn shutdown_timeout(mut self, d: Duration) -> Self {
        self.0.shutdown_timeout = d;
        self
    }

    pub fn raise_error_responses(mut self, raise: bool) -> Self {
        self.0.raise_error_responses = raise;
        self
    }

    /// Validates `heartbeat_interval < orphan_threshold` (the spec's config invariant for the
    /// MonitorThread) and `max_connections > 0`.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        if self.0.max_connections == 0 {
            return Err(EngineError::InvalidConfig("max_connections must be > 0".into()));
        }
        if self.0.heartbeat_interval >= self.0.orphan_threshold {
            return Err(EngineError::InvalidConfig(
                "heartbeat_interval must be strictly less than orphan_threshold".into(),
            ));
        }
        Ok(self.0)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
