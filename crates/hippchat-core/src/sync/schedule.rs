//! Poll interval selection.

use std::time::Duration;

use rand::Rng;

use super::events::ConversationState;
use crate::config::SyncConfig;

/// Chooses the delay before the next poll.
///
/// - After a successful poll the interval resets to the base interval.
/// - After a failed poll it becomes the error backoff plus random jitter.
/// - While burst polls remain, the burst interval wins over both, and each
///   scheduled poll uses one of them up.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    base: Duration,
    burst_interval: Duration,
    burst_polls: u32,
    error_backoff_ms: u64,
    error_jitter_ms: u64,
    current: Duration,
    burst_remaining: u32,
    failing: bool,
}

impl PollSchedule {
    pub fn new(config: &SyncConfig) -> Self {
        let base = Duration::from_millis(config.base_interval_ms);
        Self {
            base,
            burst_interval: Duration::from_millis(config.burst_interval_ms),
            burst_polls: config.burst_polls,
            error_backoff_ms: config.error_backoff_ms,
            error_jitter_ms: config.error_jitter_ms,
            current: base,
            burst_remaining: 0,
            failing: false,
        }
    }

    /// Record a successful poll that found `new_messages` new messages.
    pub fn on_success(&mut self, new_messages: usize) {
        self.current = self.base;
        self.failing = false;
        if new_messages > 0 {
            self.request_burst();
        }
    }

    /// Record a failed poll.
    pub fn on_error(&mut self) {
        let jitter = if self.error_jitter_ms > 0 {
            rand::rng().random_range(0..self.error_jitter_ms)
        } else {
            0
        };
        self.current = Duration::from_millis(self.error_backoff_ms + jitter);
        self.failing = true;
    }

    /// Make the next polls fast.
    pub fn request_burst(&mut self) {
        self.burst_remaining = self.burst_remaining.max(self.burst_polls);
    }

    /// Delay before the next poll. Consumes one burst poll if any remain.
    pub fn next_delay(&mut self) -> Duration {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            self.burst_interval
        } else {
            self.current
        }
    }

    pub fn burst_remaining(&self) -> u32 {
        self.burst_remaining
    }

    /// State implied by the most recent outcome and remaining burst.
    pub fn state(&self) -> ConversationState {
        if self.burst_remaining > 0 {
            ConversationState::Burst
        } else if self.failing {
            ConversationState::Backoff
        } else {
            ConversationState::SteadyPoll
        }
    }
}
