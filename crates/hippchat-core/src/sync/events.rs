//! Conversation state and event types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConversationState: per-conversation poller state               │
//! │  ├── Idle → InitialLoad → SteadyPoll ⇄ Backoff / Burst          │
//! │  └── Stopped (closed or cancelled)                              │
//! │                                                                 │
//! │  ConversationEvent: notifications for UI listeners              │
//! │  ├── Messages: new messages for a contact                       │
//! │  ├── Polled: a poll finished, with the next delay               │
//! │  ├── PollFailed: a poll failed, with the backoff delay          │
//! │  ├── StateChanged: poller moved to a new state                  │
//! │  └── Stopped: poller exited                                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use crate::chat::DecryptedMessage;

/// State of one conversation's poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// Not started
    #[default]
    Idle,
    /// Loading history and checking for recent incoming messages
    InitialLoad,
    /// Polling at the base interval
    SteadyPoll,
    /// Waiting out a jittered delay after a failed poll
    Backoff,
    /// Polling at the fast interval after new activity
    Burst,
    /// Closed; no further polls
    Stopped,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::InitialLoad => "initial-load",
            ConversationState::SteadyPoll => "steady",
            ConversationState::Backoff => "backoff",
            ConversationState::Burst => "burst",
            ConversationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Notifications emitted by open conversations.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// New messages, oldest first
    Messages {
        contact: String,
        messages: Vec<DecryptedMessage>,
    },
    /// A poll completed
    Polled {
        contact: String,
        new_messages: usize,
        next_delay: Duration,
    },
    /// A poll failed; the next one runs after `next_delay`
    PollFailed {
        contact: String,
        error: String,
        next_delay: Duration,
    },
    StateChanged {
        contact: String,
        state: ConversationState,
    },
    Stopped { contact: String },
}

impl ConversationEvent {
    /// Contact the event belongs to.
    pub fn contact(&self) -> &str {
        match self {
            ConversationEvent::Messages { contact, .. }
            | ConversationEvent::Polled { contact, .. }
            | ConversationEvent::PollFailed { contact, .. }
            | ConversationEvent::StateChanged { contact, .. }
            | ConversationEvent::Stopped { contact } => contact,
        }
    }
}
