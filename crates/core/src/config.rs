//! Injected configuration for the sync subsystem.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::sync::{SYNC_INTERVAL_JITTER_SECS, SYNC_PERIODIC_INTERVAL_SECS};

/// Settings handed to the engine, scheduler and repository at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Policy for direct, user-facing remote calls.
    pub retry: RetryPolicy,
    pub periodic_interval_secs: u64,
    pub periodic_jitter_secs: u64,
    /// Upper bound for a single remote call made by the engine.
    pub remote_timeout_ms: u64,
    /// Move a record aside after this many permanent failures. `None` keeps
    /// retrying forever.
    pub dead_letter_after: Option<u32>,
    /// Undo window before a soft delete becomes a DELETE mutation.
    pub soft_delete_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            periodic_interval_secs: SYNC_PERIODIC_INTERVAL_SECS,
            periodic_jitter_secs: SYNC_INTERVAL_JITTER_SECS,
            remote_timeout_ms: 30_000,
            dead_letter_after: None,
            soft_delete_grace_ms: 5_000,
        }
    }
}

impl SyncConfig {
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs.max(1))
    }

    pub fn periodic_jitter(&self) -> Duration {
        Duration::from_secs(self.periodic_jitter_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms.max(1))
    }

    pub fn soft_delete_grace(&self) -> Duration {
        Duration::from_millis(self.soft_delete_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"deadLetterAfter": 5, "retry": {"maxAttempts": 4}}"#)
                .unwrap();
        assert_eq!(config.dead_letter_after, Some(5));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.periodic_interval(), Duration::from_secs(15 * 60));
    }
}
