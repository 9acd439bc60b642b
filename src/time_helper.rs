//! Monotonic timestamp helpers shared by the task lifecycle and the inflight registry.
//!
//! The engine mixes two notions of time: wall-clock-ish millisecond timestamps that are
//! written into the KVStore (and must therefore be comparable across processes) and
//! monotonic `Instant`s used for local duration measurement. This module centralizes the
//! conversion so the rest of the crate never calls `SystemTime::now()` directly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
///
/// Used for heartbeat scores and inflight bookkeeping, where multiple processes need a
/// shared notion of "now" that can be written to and read back from the KVStore.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Converts a millisecond timestamp into a `Duration` elapsed since that instant, saturating
/// at zero if `since_ms` is in the future relative to now.
pub fn elapsed_ms_since(since_ms: i64) -> i64 {
    (now_ms() - since_ms).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonically_non_decreasing() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn elapsed_ms_since_never_negative() {
        let future = now_ms() + 10_000;
        assert_eq!(elapsed_ms_since(future), 0);
    }
}
