//! Process identity used to namespace task ids and to recognize a process's own
//! inflight entries during orphan recovery.
//!
//! Every inflight task id is prefixed with the identity of the process that owns it, so any
//! process running `TaskMonitor::cleanup_orphaned_requests` can tell, from the id alone,
//! whether the owning process is still alive (present in the `processes` set) without a
//! separate lookup table.

use std::fmt;
use std::process;

/// `"<sanitized-hostname>:<pid>:<8-byte-hex>"` — unique per process start.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcessIdentity(String);

impl ProcessIdentity {
    /// Builds a fresh identity for the current process, sampling a random suffix so that
    /// two processes started in the same second on the same host (e.g. under a PID-reusing
    /// supervisor) never collide.
    pub fn current() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self::build(&hostname, process::id(), &mut rand_bytes())
    }

    /// Builds a deterministic identity for tests that need several distinct, stable
    /// `ProcessIdentity` values (e.g. to simulate a live vs. a dead process).
    #[cfg(test)]
    pub fn current_for_test(suffix: &str) -> Self {
        let bytes = {
            let mut buf = [0u8; 8];
            for (i, b) in suffix.bytes().take(8).enumerate() {
                buf[i] = b;
            }
            buf
        };
        Self::build("test-host", 1, &bytes)
    }

    fn build(hostname: &str, pid: u32, suffix_bytes: &[u8; 8]) -> Self {
        let sanitized = sanitize_hostname(hostname);
        let suffix = suffix_bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Self(format!("{sanitized}:{pid}:{suffix}"))
    }

    /// The full identity string, as stored in the `processes` set.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaces a bare task uuid under this process identity.
    pub fn task_id(&self, uuid: &str) -> String {
        format!("{}/{}", self.0, uuid)
    }

    /// Recovers the owning process identity from a namespaced task id, by stripping the
    /// trailing `/<uuid>` (and any `/N` redirect-hop suffix) component.
    pub fn prefix_of(task_id: &str) -> &str {
        match task_id.split_once('/') {
            Some((prefix, _rest)) => prefix,
            None => task_id,
        }
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize_hostname(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

fn rand_bytes() -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..8]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_produces_expected_shape() {
        let id = ProcessIdentity::build("My Host!", 42, &[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(id.as_str(), "My_Host_:42:deadbeef01020304");
    }

    #[test]
    fn task_id_round_trips_prefix() {
        let id = ProcessIdentity::build("host", 7, &[1; 8]);
        let task_id = id.task_id("abc-123");
        assert_eq!(ProcessIdentity::prefix_of(&task_id), id.as_str());
    }

    #[test]
    fn prefix_of_handles_redirect_hop_suffix() {
        let id = ProcessIdentity::build("host", 7, &[1; 8]);
        let task_id = format!("{}/1", id.task_id("abc-123"));
        assert_eq!(ProcessIdentity::prefix_of(&task_id), id.as_str());
    }

    #[test]
    fn current_is_non_empty() {
        let id = ProcessIdentity::current();
        assert!(!id.as_str().is_empty());
    }
}
