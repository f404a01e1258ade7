//! Protocol timing and sizing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default steady-state poll interval.
const DEFAULT_BASE_INTERVAL_MS: u64 = 3000;

/// Poll interval while in burst mode.
const DEFAULT_BURST_INTERVAL_MS: u64 = 1000;

/// Number of fast polls after new activity.
const DEFAULT_BURST_POLLS: u32 = 3;

/// Delay after a failed poll, before jitter.
const DEFAULT_ERROR_BACKOFF_MS: u64 = 5000;

/// Upper bound of the random jitter added to the error backoff.
const DEFAULT_ERROR_JITTER_MS: u64 = 1000;

/// Configuration for conversation sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between polls after a successful cycle (ms)
    pub base_interval_ms: u64,
    /// Interval used while burst polls remain (ms)
    pub burst_interval_ms: u64,
    /// How many fast polls follow new activity
    pub burst_polls: u32,
    /// Delay after a failed poll (ms)
    pub error_backoff_ms: u64,
    /// Max jitter added to `error_backoff_ms` (ms)
    pub error_jitter_ms: u64,
    /// Lines loaded when a conversation has no saved offset
    pub initial_history_lines: usize,
    /// Lines loaded when a recent incoming message is missing locally
    pub backfill_lines: usize,
    /// How far back a message counts as "recent" at conversation open (ms)
    pub recent_incoming_lookback_ms: i64,
    /// Lines sampled when looking for recent incoming messages
    pub recent_incoming_sample: usize,
    /// Deliver undecryptable lines with no content instead of skipping them
    pub keep_undecryptable: bool,
    /// Retry policy for object store calls
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: DEFAULT_BASE_INTERVAL_MS,
            burst_interval_ms: DEFAULT_BURST_INTERVAL_MS,
            burst_polls: DEFAULT_BURST_POLLS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            error_jitter_ms: DEFAULT_ERROR_JITTER_MS,
            initial_history_lines: 100,
            backfill_lines: 150,
            recent_incoming_lookback_ms: 10 * 60 * 1000,
            recent_incoming_sample: 50,
            keep_undecryptable: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (ms); doubles each retry
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.base_interval_ms, 3000);
        assert_eq!(config.burst_interval_ms, 1000);
        assert_eq!(config.burst_polls, 3);
        assert_eq!(config.error_backoff_ms, 5000);
        assert_eq!(config.error_jitter_ms, 1000);
        assert_eq!(config.initial_history_lines, 100);
        assert_eq!(config.backfill_lines, 150);
        assert!(!config.keep_undecryptable);
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(300));
        assert_eq!(policy.backoff(1), Duration::from_millis(600));
        assert_eq!(policy.backoff(2), Duration::from_millis(1200));
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"base_interval_ms": 2000}"#).unwrap();
        assert_eq!(config.base_interval_ms, 2000);
        assert_eq!(config.burst_polls, 3);
        assert_eq!(config.retry, RetryPolicy::default());
    }
}
